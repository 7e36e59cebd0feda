mod common;

use common::*;
use orderly_core::{BatchSignContext, EventPayload, OrderError, OrderStatus};
use orderly_ids::ShardableUuid;

fn context(token: &str) -> BatchSignContext {
    BatchSignContext {
        signer_id: SIGNER,
        token: token.to_owned(),
        signature: SIGNATURE_PNG.to_vec(),
        ip_address: "10.0.0.1".into(),
        user_agent: None,
    }
}

#[test]
fn batch_with_one_incomplete_order() {
    let h = harness();
    let first = h.create(vec![CBC], &["E11.9"]);
    let incomplete = h.create(vec![LIPID], &[]);
    let third = h.create(vec![LIPID], &["E78.5"]);
    let session = h.login(SIGNER);

    let outcome = h
        .service
        .sign_many(&[first.id, incomplete.id, third.id], context(&session.token))
        .unwrap();

    assert_eq!((outcome.total, outcome.signed, outcome.failed), (3, 2, 1));
    assert!(outcome.results[0].signed);
    assert!(!outcome.results[1].signed);
    assert_eq!(outcome.results[1].code, Some("incomplete_order"));
    assert!(outcome.results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("ICD-10"));
    assert!(outcome.results[2].signed);

    for id in [first.id, third.id] {
        assert_eq!(h.service.get_order(&id).unwrap().status, OrderStatus::Signed);
        assert!(h.service.verify_signature(&id).unwrap().is_verified());
    }
    assert_eq!(
        h.service.get_order(&incomplete.id).unwrap().status,
        OrderStatus::Draft
    );

    // The parent session is consumed once anything was signed.
    assert!(!h.service.sessions().validate(&session.token, SIGNER).unwrap().valid);

    let history = h.service.audit().list_for_signer(SIGNER).unwrap();
    match &history.last().unwrap().payload {
        EventPayload::BatchSigned {
            total,
            signed,
            failed,
            ..
        } => assert_eq!((*total, *signed, *failed), (3, 2, 1)),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn batch_where_nothing_signs_keeps_parent_session() {
    let h = harness();
    let incomplete = h.create(vec![CBC], &[]);
    let session = h.login(SIGNER);

    let outcome = h
        .service
        .sign_many(&[incomplete.id, ShardableUuid::new()], context(&session.token))
        .unwrap();

    assert_eq!(outcome.signed, 0);
    assert_eq!(outcome.results[1].code, Some("not_found"));
    assert!(h.service.sessions().validate(&session.token, SIGNER).unwrap().valid);
}

#[test]
fn batch_size_and_session_checked_up_front() {
    let h = harness();
    let session = h.login(SIGNER);

    assert!(matches!(
        h.service.sign_many(&[], context(&session.token)),
        Err(OrderError::Validation(_))
    ));

    let too_many: Vec<_> = (0..11).map(|_| ShardableUuid::new()).collect();
    assert!(matches!(
        h.service.sign_many(&too_many, context(&session.token)),
        Err(OrderError::TooManyOrders { count: 11, max: 10 })
    ));

    let order = h.create(vec![CBC], &["E11.9"]);
    assert!(matches!(
        h.service.sign_many(&[order.id], context(&"0".repeat(64))),
        Err(OrderError::InvalidSession)
    ));
}
