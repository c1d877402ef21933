use dcb_core::{Event, Tag};

#[derive(Event)]
struct WalletOpened {
    #[tag]
    wallet_id: String,
    opening_balance: u64,
}

#[derive(Event)]
struct AccountDeactivated;

#[allow(clippy::enum_variant_names)]
#[derive(Event)]
enum DomainEvent {
    WalletOpened {
        #[tag]
        wallet_id: String,
        opening_balance: u64,
    },
    FundsTransferred {
        #[tag]
        from_wallet: String,
        #[tag]
        to_wallet: String,
        amount: u64,
    },
    LedgerReconciled,
}

#[test]
fn struct_event_reports_its_type_name_and_tagged_fields() {
    let event = WalletOpened {
        wallet_id: "w1".to_string(),
        opening_balance: 1000,
    };

    assert_eq!(event.event_type(), "WalletOpened");
    assert_eq!(event.tags(), vec![Tag::new("wallet_id", "w1").unwrap()]);
}

#[test]
fn struct_event_with_no_tagged_fields_has_no_tags() {
    let event = AccountDeactivated;
    assert_eq!(event.event_type(), "AccountDeactivated");
    assert!(event.tags().is_empty());
}

#[test]
fn enum_event_uses_the_matched_variant_name_and_its_tagged_fields() {
    let opened = DomainEvent::WalletOpened {
        wallet_id: "w1".to_string(),
        opening_balance: 1000,
    };
    assert_eq!(opened.event_type(), "WalletOpened");
    assert_eq!(opened.tags(), vec![Tag::new("wallet_id", "w1").unwrap()]);

    let transferred = DomainEvent::FundsTransferred {
        from_wallet: "w1".to_string(),
        to_wallet: "w2".to_string(),
        amount: 250,
    };
    assert_eq!(transferred.event_type(), "FundsTransferred");
    assert_eq!(
        transferred.tags(),
        vec![
            Tag::new("from_wallet", "w1").unwrap(),
            Tag::new("to_wallet", "w2").unwrap(),
        ]
    );
}

#[test]
fn enum_unit_variant_has_no_tags() {
    let reconciled = DomainEvent::LedgerReconciled;
    assert_eq!(reconciled.event_type(), "LedgerReconciled");
    assert!(reconciled.tags().is_empty());
}
