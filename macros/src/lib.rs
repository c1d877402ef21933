mod event;

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Derives `dcb_core::Event` for a struct or enum.
///
/// `event_type()` is the item's name, or for an enum the matched variant's name.
/// `tags()` collects one `Tag` per field (or per matched variant's field) marked `#[tag]`,
/// using the field's name as the tag key and its `Display` output as the tag value.
///
/// # Example
///
/// ```rust
/// use dcb_core::Event;
///
/// #[derive(Event)]
/// enum DomainEvent {
///     WalletOpened {
///         #[tag]
///         wallet_id: String,
///         opening_balance: u64,
///     },
///     WalletClosed {
///         #[tag]
///         wallet_id: String,
///     },
/// }
/// ```
///
/// Tuple variants are not supported; use named fields with `#[tag]` instead.
#[proc_macro_derive(Event, attributes(tag))]
pub fn event(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    event::event_inner(&ast)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
