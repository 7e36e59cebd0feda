mod common;

use common::*;
use orderly_core::{
    EventPayload, MissingItem, OrderError, OrderFilter, OrderPatch, OrderStatus, Priority,
    Resource, StatusMetadata,
};
use orderly_ids::ShardableUuid;

#[test]
fn create_then_sign_stat_order() {
    let h = harness();
    let mut request = new_order(vec![CBC], &["e11.9"]);
    request.priority = Priority::Stat;

    let created = h.service.create_order(request).unwrap();
    let order = created.order;
    assert_eq!(order.status, OrderStatus::Draft);
    assert_eq!(order.priority, Priority::Stat);
    assert!(order.order_number.starts_with("ORD-20260111-"));
    assert_eq!(order.icd10_codes[0].as_str(), "E11.9");
    assert!(!created.compliance.required);

    let timeline = h.service.get_order_timeline(&order.id).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].event_type(), "order_created");

    let session = h.login(SIGNER);
    let record = h
        .service
        .sign_order(h.sign_request(&order, &session))
        .unwrap();
    assert_eq!(record.signer_name, "Dr Ada Lovelace");
    assert_eq!(record.media_type.as_deref(), Some("image/png"));

    let signed = h.service.get_order(&order.id).unwrap();
    assert_eq!(signed.status, OrderStatus::Signed);

    let timeline = h.service.get_order_timeline(&order.id).unwrap();
    let signed_events: Vec<_> = timeline
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::OrderSigned { signature, .. } => Some(signature),
            _ => None,
        })
        .collect();
    assert_eq!(signed_events.len(), 1);

    let stored = std::fs::read(h.artifact_root.join(&signed_events[0].artifact_path)).unwrap();
    assert_eq!(
        orderly_types::Sha256Hash::digest(&stored),
        signed_events[0].content_hash
    );
}

#[test]
fn order_numbers_are_unique() {
    let h = harness();
    let a = h.create(vec![CBC], &["E11.9"]);
    let b = h.create(vec![CBC], &["E11.9"]);
    assert_ne!(a.order_number, b.order_number);
}

#[test]
fn create_rejects_bad_references() {
    let h = harness();

    let mut unknown_facility = new_order(vec![CBC], &["E11.9"]);
    unknown_facility.facility_id = 99;
    assert!(matches!(
        h.service.create_order(unknown_facility),
        Err(OrderError::NotFound(Resource::Facility(99)))
    ));

    let mut closed = new_order(vec![CBC], &["E11.9"]);
    closed.facility_id = CLOSED_FACILITY;
    assert!(matches!(
        h.service.create_order(closed),
        Err(OrderError::Validation(_))
    ));

    let mut unknown_patient = new_order(vec![CBC], &["E11.9"]);
    unknown_patient.patient_id = 404;
    assert!(matches!(
        h.service.create_order(unknown_patient),
        Err(OrderError::NotFound(Resource::Patient(404)))
    ));

    for bad in [
        new_order(vec![], &["E11.9"]),
        new_order(vec![RETIRED_TEST], &["E11.9"]),
        new_order(vec![CBC], &["E1"]),
    ] {
        assert!(matches!(
            h.service.create_order(bad),
            Err(OrderError::Validation(_))
        ));
    }

    assert!(h.service.list_orders(OrderFilter::default()).unwrap().is_empty());
}

#[test]
fn incomplete_order_reports_every_missing_item() {
    let h = harness();
    let mut request = new_order(vec![GENETIC_PANEL], &[]);
    request.patient_id = MEDICARE_PATIENT;
    let order = h.service.create_order(request).unwrap().order;

    let session = h.login(SIGNER);
    let err = h
        .service
        .sign_order(h.sign_request(&order, &session))
        .unwrap_err();

    match err {
        OrderError::IncompleteOrder(missing) => assert_eq!(
            missing,
            vec![MissingItem::DiagnosisCodes, MissingItem::ComplianceNotice]
        ),
        other => panic!("expected IncompleteOrder, got {other:?}"),
    }
    // The rejected call consumed nothing.
    assert!(h.service.sessions().validate(&session.token, SIGNER).unwrap().valid);
    assert_eq!(h.service.get_order(&order.id).unwrap().status, OrderStatus::Draft);
}

#[test]
fn signed_compliance_notice_unblocks_signing() {
    let h = harness();
    let mut request = new_order(vec![GENETIC_PANEL], &["Z13.79"]);
    request.patient_id = MEDICARE_PATIENT;
    let created = h.service.create_order(request).unwrap();
    assert!(created.compliance.required);
    let order = created.order;

    let with_notice = h
        .service
        .sign_compliance_notice(&order.id, b"data:image/png;base64,iVBORw0KGgo=", Some(SIGNER))
        .unwrap();
    assert!(with_notice.compliance_notice_signed);
    assert!(with_notice.compliance_artifact_path.is_some());

    let session = h.login(SIGNER);
    h.service
        .sign_order(h.sign_request(&order, &session))
        .unwrap();

    let types: Vec<_> = h
        .service
        .get_order_timeline(&order.id)
        .unwrap()
        .iter()
        .map(|e| e.event_type())
        .collect();
    assert_eq!(types, ["order_created", "abn_signed", "order_signed"]);
}

#[test]
fn only_requesting_signer_may_sign() {
    let h = harness();
    let order = h.create(vec![CBC], &["E11.9"]);
    let session = h.login(OTHER_SIGNER);

    assert!(matches!(
        h.service.sign_order(h.sign_request(&order, &session)),
        Err(OrderError::NotAuthorizedSigner { signer: OTHER_SIGNER, .. })
    ));
}

#[test]
fn update_allowed_only_before_sending() {
    let h = harness();
    let order = h.create(vec![CBC], &["E11.9"]);

    let updated = h
        .service
        .update_order(
            &order.id,
            OrderPatch {
                priority: Some(Priority::Urgent),
                test_ids: Some(vec![CBC, LIPID]),
                notes: Some("fasting".into()),
                actor_id: Some(SIGNER),
                ..OrderPatch::default()
            },
        )
        .unwrap();
    assert_eq!(updated.tests.len(), 2);
    assert_eq!(updated.notes.as_deref(), Some("fasting"));

    let timeline = h.service.get_order_timeline(&order.id).unwrap();
    match &timeline.last().unwrap().payload {
        EventPayload::OrderUpdated { changed_fields } => {
            assert_eq!(changed_fields, &["priority", "tests", "notes"])
        }
        other => panic!("unexpected event {other:?}"),
    }

    let bad_codes = OrderPatch {
        icd10_codes: Some(vec!["nonsense".into()]),
        ..OrderPatch::default()
    };
    assert!(matches!(
        h.service.update_order(&order.id, bad_codes),
        Err(OrderError::Validation(_))
    ));

    let session = h.login(SIGNER);
    h.service.sign_order(h.sign_request(&order, &session)).unwrap();
    h.service
        .update_status(&order.id, OrderStatus::Sent, StatusMetadata::default())
        .unwrap();

    assert!(matches!(
        h.service.update_order(&order.id, OrderPatch::default()),
        Err(OrderError::OrderNotEditable(OrderStatus::Sent))
    ));
}

#[test]
fn status_updates_follow_the_table_and_stamp_times() {
    let h = harness();
    let order = h.create(vec![CBC], &["E11.9"]);

    assert!(matches!(
        h.service
            .update_status(&order.id, OrderStatus::Signed, StatusMetadata::default()),
        Err(OrderError::Validation(_))
    ));
    assert!(matches!(
        h.service
            .update_status(&order.id, OrderStatus::Sent, StatusMetadata::default()),
        Err(OrderError::InvalidTransition {
            from: OrderStatus::Draft,
            to: OrderStatus::Sent
        })
    ));

    let session = h.login(SIGNER);
    h.service.sign_order(h.sign_request(&order, &session)).unwrap();

    for status in [
        OrderStatus::Sent,
        OrderStatus::Ack,
        OrderStatus::InProgress,
        OrderStatus::Final,
        OrderStatus::Corrected,
    ] {
        h.clock.advance(chrono::Duration::minutes(5));
        h.service
            .update_status(
                &order.id,
                status,
                StatusMetadata {
                    external_reference: Some("LAB-991".into()),
                    ..StatusMetadata::default()
                },
            )
            .unwrap();
    }

    let done = h.service.get_order(&order.id).unwrap();
    assert_eq!(done.status, OrderStatus::Corrected);
    assert!(done.sent_at.unwrap() < done.ack_at.unwrap());
    assert!(done.final_at.unwrap() > done.ack_at.unwrap());

    let types: Vec<_> = h
        .service
        .get_order_timeline(&order.id)
        .unwrap()
        .iter()
        .map(|e| e.event_type())
        .collect();
    assert_eq!(
        types,
        [
            "order_created",
            "order_signed",
            "order_sent",
            "order_ack",
            "status_changed",
            "result_received",
            "result_received",
        ]
    );

    assert!(matches!(
        h.service.cancel_order(&order.id, "duplicate", None),
        Err(OrderError::InvalidTransition { .. })
    ));
}

#[test]
fn every_unlisted_transition_is_rejected() {
    for from in OrderStatus::ALL {
        for to in OrderStatus::ALL {
            let result = from.ensure_transition(to);
            assert_eq!(result.is_ok(), from.allowed_targets().contains(&to));
        }
    }
}

#[test]
fn cancel_requires_reason() {
    let h = harness();
    let order = h.create(vec![CBC], &["E11.9"]);

    assert!(matches!(
        h.service.cancel_order(&order.id, "  ", Some(SIGNER)),
        Err(OrderError::Validation(_))
    ));
    let canceled = h
        .service
        .cancel_order(&order.id, "patient declined", Some(SIGNER))
        .unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);

    let last = h.service.get_order_timeline(&order.id).unwrap().pop().unwrap();
    match last.payload {
        EventPayload::OrderCanceled(change) => {
            assert_eq!(change.reason.as_deref(), Some("patient declined"))
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn lookups_of_unknown_orders() {
    let h = harness();
    let missing = ShardableUuid::new();
    assert!(matches!(
        h.service.get_order(&missing),
        Err(OrderError::NotFound(Resource::Order(_)))
    ));
    assert!(h.service.get_order_timeline(&missing).is_err());
}

#[test]
fn list_orders_filters() {
    let h = harness();
    let a = h.create(vec![CBC], &["E11.9"]);
    let _b = h.create(vec![LIPID], &["I10"]);
    h.service.cancel_order(&a.id, "entered in error", None).unwrap();

    let canceled = h
        .service
        .list_orders(OrderFilter {
            status: Some(OrderStatus::Canceled),
            ..OrderFilter::default()
        })
        .unwrap();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].id, a.id);
    assert_eq!(h.service.list_orders(OrderFilter::default()).unwrap().len(), 2);
}

#[test]
fn compliance_for_genetic_panel_by_payer() {
    let h = harness();

    let medicare = h
        .service
        .check_compliance_requirement(MEDICARE_PATIENT, FACILITY, &[GENETIC_PANEL])
        .unwrap();
    assert!(medicare.required);
    assert!(medicare.reasons.iter().any(|r| r.contains("Genetic")));

    let commercial = h
        .service
        .check_compliance_requirement(COMMERCIAL_PATIENT, FACILITY, &[GENETIC_PANEL, CBC])
        .unwrap();
    assert!(commercial.required);
    assert!(commercial.per_test[0].required);
    assert!(!commercial.per_test[1].required);
}
