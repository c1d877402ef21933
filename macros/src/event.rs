use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DataEnum, DataStruct, DeriveInput, Error, Fields, Result};

const TAG: &str = "tag";

fn is_tag(field: &syn::Field) -> bool {
    field.attrs.iter().any(|attr| attr.path().is_ident(TAG))
}

pub fn event_inner(ast: &DeriveInput) -> Result<TokenStream> {
    match ast.data {
        Data::Enum(ref data) => impl_enum(ast, data),
        Data::Struct(ref data) => impl_struct(ast, data),
        Data::Union(_) => Err(Error::new_spanned(ast, "Event cannot be derived for unions")),
    }
}

fn tagged_fields(fields: &Fields) -> Vec<&syn::Ident> {
    match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .filter(|f| is_tag(f))
            .filter_map(|f| f.ident.as_ref())
            .collect(),
        Fields::Unnamed(_) | Fields::Unit => Vec::new(),
    }
}

fn tag_pushes(tagged: &[&syn::Ident], binder: impl Fn(&syn::Ident) -> TokenStream) -> TokenStream {
    let pushes = tagged.iter().map(|ident| {
        let name = ident.to_string();
        let value = binder(ident);
        quote! {
            tags.push(dcb_core::Tag::new(#name, #value.to_string()).expect("tag field values are never empty"));
        }
    });
    quote! { #(#pushes)* }
}

fn impl_struct(ast: &DeriveInput, data: &DataStruct) -> Result<TokenStream> {
    let name = &ast.ident;
    let event_type = name.to_string();

    let tagged = tagged_fields(&data.fields);
    let pushes = tag_pushes(&tagged, |ident| quote!(self.#ident));

    Ok(quote! {
        impl dcb_core::Event for #name {
            fn event_type(&self) -> &'static str {
                #event_type
            }

            fn tags(&self) -> Vec<dcb_core::Tag> {
                let mut tags = Vec::new();
                #pushes
                tags
            }
        }
    })
}

fn impl_enum(ast: &DeriveInput, data: &DataEnum) -> Result<TokenStream> {
    let name = &ast.ident;

    let mut event_type_arms = Vec::new();
    let mut tags_arms = Vec::new();

    for variant in &data.variants {
        let variant_ident = &variant.ident;
        let event_type = variant_ident.to_string();

        match &variant.fields {
            Fields::Named(_) => {
                let tagged = tagged_fields(&variant.fields);

                event_type_arms.push(quote! {
                    #name::#variant_ident { .. } => #event_type,
                });

                let pushes = tag_pushes(&tagged, |ident| quote!(#ident));
                tags_arms.push(quote! {
                    #name::#variant_ident { #(#tagged,)* .. } => {
                        let mut tags = Vec::new();
                        #pushes
                        tags
                    }
                });
            }
            Fields::Unit => {
                event_type_arms.push(quote! {
                    #name::#variant_ident => #event_type,
                });
                tags_arms.push(quote! {
                    #name::#variant_ident => Vec::new(),
                });
            }
            Fields::Unnamed(_) => {
                return Err(Error::new_spanned(
                    variant,
                    "Event does not support tuple variants; use named fields with #[tag]",
                ));
            }
        }
    }

    Ok(quote! {
        impl dcb_core::Event for #name {
            fn event_type(&self) -> &'static str {
                match self {
                    #(#event_type_arms)*
                }
            }

            fn tags(&self) -> Vec<dcb_core::Tag> {
                match self {
                    #(#tags_arms)*
                }
            }
        }
    })
}
