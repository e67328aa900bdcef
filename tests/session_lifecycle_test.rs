mod common;

use common::TestApp;
use packhouse_api::entities::{order::OrderStatus, warehouse_session::SessionStatus};
use packhouse_api::errors::ServiceError;

#[tokio::test]
async fn full_pipeline_decrements_stock_and_ships_orders() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_a = app.seed_order(&[(widget, 3)]).await;
    let order_b = app.seed_order(&[(widget, 3)]).await;

    let session = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("create session");
    assert_eq!(session.status, "picking");
    assert_eq!(app.order_status(order_a).await, OrderStatus::Picking);
    assert_eq!(app.order_session(order_a).await, Some(session.id));

    // Line items aggregate per product across orders.
    let list = app
        .picking
        .get_picking_list(session.id, app.store_id)
        .await
        .expect("picking list");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].quantity_required, 6);
    assert_eq!(list[0].quantity_picked, 0);

    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");
    assert_eq!(app.session_status(session.id).await, SessionStatus::Packing);
    assert_eq!(app.order_status(order_a).await, OrderStatus::Packing);

    // One pack assignment per (order, product), zero-initialized.
    let assignments = app.assignments_for(session.id).await;
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().all(|a| a.quantity_packed == 0));

    for order_id in [order_a, order_b] {
        for _ in 0..3 {
            app.packing
                .claim_pack_unit(session.id, app.store_id, order_id, widget)
                .await
                .expect("claim pack unit");
        }
    }

    let view = app
        .sessions
        .complete_session(session.id, app.store_id)
        .await
        .expect("complete session");
    assert_eq!(view.status, "completed");
    assert_eq!(app.order_status(order_a).await, OrderStatus::ReadyToShip);
    assert_eq!(app.order_status(order_b).await, OrderStatus::ReadyToShip);

    // Stock drops by the picked quantity, exactly once, with a ledger row.
    assert_eq!(app.stock_of(widget).await, 4);
    let movements = app.movements_for(widget).await;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, -6);
    assert_eq!(movements[0].previous_quantity, 10);
    assert_eq!(movements[0].new_quantity, 4);
    assert_eq!(movements[0].reference_id, Some(session.id));
}

#[tokio::test]
async fn create_rejects_empty_selection() {
    let app = TestApp::new().await;
    let err = app
        .sessions
        .create_session(app.store_id, vec![], app.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::EmptySelection));
}

#[tokio::test]
async fn claimed_orders_cannot_join_a_second_session() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_a = app.seed_order(&[(widget, 2)]).await;
    let order_b = app.seed_order(&[(widget, 2)]).await;

    app.sessions
        .create_session(app.store_id, vec![order_a], app.user_id)
        .await
        .expect("first session");

    // The batch claim is all-or-nothing: one claimed order poisons the
    // whole selection, and the free order stays unclaimed.
    let err = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOrderState(_)));
    assert_eq!(app.order_status(order_b).await, OrderStatus::Confirmed);
    assert_eq!(app.order_session(order_b).await, None);
}

#[tokio::test]
async fn create_rejects_orders_from_another_store() {
    let app = TestApp::new().await;
    let other_store = uuid::Uuid::new_v4();
    let widget = app.seed_product_for(other_store, "Widget", 10).await;
    let foreign_order = app.seed_order_for(other_store, &[(widget, 1)]).await;

    let err = app
        .sessions
        .create_session(app.store_id, vec![foreign_order], app.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOrderState(_)));
    assert_eq!(app.order_session(foreign_order).await, None);
}

#[tokio::test]
async fn finish_picking_requires_every_entry_complete() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let gadget = app.seed_product("Gadget", 10).await;
    let order_id = app.seed_order(&[(widget, 4), (gadget, 2)]).await;

    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");

    app.picking
        .update_picking_progress(session.id, app.store_id, widget, 4)
        .await
        .expect("pick widgets");
    app.picking
        .update_picking_progress(session.id, app.store_id, gadget, 1)
        .await
        .expect("pick one gadget");

    let err = app
        .sessions
        .finish_picking(session.id, app.store_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PickingIncomplete { remaining: 1 }));
    assert_eq!(app.session_status(session.id).await, SessionStatus::Picking);
    assert!(app.assignments_for(session.id).await.is_empty());
}

#[tokio::test]
async fn picked_quantity_is_a_recount_not_a_delta() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_id = app.seed_order(&[(widget, 5)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");

    app.picking
        .update_picking_progress(session.id, app.store_id, widget, 3)
        .await
        .expect("first count");
    // Resubmitting the same count must not compound, and counts can go down.
    app.picking
        .update_picking_progress(session.id, app.store_id, widget, 3)
        .await
        .expect("same count again");
    assert_eq!(app.pick_entry(session.id, widget).await.quantity_picked, 3);

    app.picking
        .update_picking_progress(session.id, app.store_id, widget, 2)
        .await
        .expect("corrected count");
    assert_eq!(app.pick_entry(session.id, widget).await.quantity_picked, 2);
}

#[tokio::test]
async fn picking_is_capped_by_requirement_and_stock() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 7).await;
    let order_a = app.seed_order(&[(widget, 5)]).await;
    let order_b = app.seed_order(&[(widget, 5)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("create session");

    let err = app
        .picking
        .update_picking_progress(session.id, app.store_id, widget, 11)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = app
        .picking
        .update_picking_progress(session.id, app.store_id, widget, 10)
        .await
        .unwrap_err();
    match err {
        ServiceError::InsufficientStock {
            available,
            requested,
            ..
        } => {
            assert_eq!(available, 7);
            assert_eq!(requested, 10);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(app.pick_entry(session.id, widget).await.quantity_picked, 0);
}

#[tokio::test]
async fn complete_refuses_while_an_order_is_unpacked() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_a = app.seed_order(&[(widget, 1)]).await;
    let order_b = app.seed_order(&[(widget, 1)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");

    app.packing
        .claim_pack_unit(session.id, app.store_id, order_a, widget)
        .await
        .expect("pack order a");

    let err = app
        .sessions
        .complete_session(session.id, app.store_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::PackingIncomplete { unpacked_orders: 1 }
    ));
    assert_eq!(app.session_status(session.id).await, SessionStatus::Packing);
    assert_eq!(app.stock_of(widget).await, 10);
}

#[tokio::test]
async fn orders_without_line_items_do_not_block_completion() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order = app.seed_order(&[(widget, 1)]).await;
    let empty_order = app.seed_order(&[]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order, empty_order], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");

    // Nothing to pack means vacuously packed, in the list and in the
    // completion gate alike.
    let list = app
        .packing
        .get_packing_list(session.id, app.store_id)
        .await
        .expect("packing list");
    let empty_view = list
        .iter()
        .find(|o| o.order_id == empty_order)
        .expect("empty order view");
    assert!(empty_view.items.is_empty());
    assert!(empty_view.fully_packed);

    app.packing
        .claim_pack_unit(session.id, app.store_id, order, widget)
        .await
        .expect("pack the real order");
    app.sessions
        .complete_session(session.id, app.store_id)
        .await
        .expect("complete");
    assert_eq!(app.order_status(empty_order).await, OrderStatus::ReadyToShip);
}

#[tokio::test]
async fn picking_updates_distinguish_wrong_phase_from_terminal() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_id = app.seed_order(&[(widget, 1)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");

    let err = app
        .picking
        .update_picking_progress(session.id, app.store_id, widget, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SessionNotInPicking(_)));

    app.packing
        .claim_pack_unit(session.id, app.store_id, order_id, widget)
        .await
        .expect("pack");
    app.sessions
        .complete_session(session.id, app.store_id)
        .await
        .expect("complete");

    let err = app
        .picking
        .update_picking_progress(session.id, app.store_id, widget, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SessionTerminal(_)));
}

#[tokio::test]
async fn abandon_restores_orders_and_discards_progress() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_a = app.seed_order(&[(widget, 2)]).await;
    let order_b = app.seed_order(&[(widget, 2)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;

    let outcome = app
        .sessions
        .abandon_session(session.id, app.store_id, app.user_id, None)
        .await
        .expect("abandon");
    assert_eq!(outcome.orders_restored.len(), 2);
    assert_eq!(app.session_status(session.id).await, SessionStatus::Abandoned);
    assert_eq!(app.order_status(order_a).await, OrderStatus::Confirmed);
    assert_eq!(app.order_session(order_a).await, None);
    assert_eq!(app.stock_of(widget).await, 10);

    // Restored orders are immediately claimable by a new session.
    app.sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("re-create from restored orders");

    let err = app
        .sessions
        .abandon_session(session.id, app.store_id, app.user_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn completed_session_cannot_be_abandoned_or_recompleted() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 5).await;
    let order_id = app.seed_order(&[(widget, 2)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");
    for _ in 0..2 {
        app.packing
            .claim_pack_unit(session.id, app.store_id, order_id, widget)
            .await
            .expect("claim");
    }
    app.sessions
        .complete_session(session.id, app.store_id)
        .await
        .expect("complete");
    assert_eq!(app.stock_of(widget).await, 3);

    let err = app
        .sessions
        .abandon_session(session.id, app.store_id, app.user_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyTerminal(_)));
    let err = app
        .sessions
        .complete_session(session.id, app.store_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyTerminal(_)));

    // The decrement happened exactly once.
    assert_eq!(app.stock_of(widget).await, 3);
    assert_eq!(app.movements_for(widget).await.len(), 1);
}

#[tokio::test]
async fn complete_fails_closed_when_stock_ran_out_underneath() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 5).await;
    let order_id = app.seed_order(&[(widget, 4)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");
    for _ in 0..4 {
        app.packing
            .claim_pack_unit(session.id, app.store_id, order_id, widget)
            .await
            .expect("claim");
    }

    // A concurrent adjustment drained the product before completion.
    app.set_stock(widget, 2).await;

    let err = app
        .sessions
        .complete_session(session.id, app.store_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::StockDecrementFailed { .. }));

    // Nothing committed: session still packing, stock and orders untouched.
    assert_eq!(app.session_status(session.id).await, SessionStatus::Packing);
    assert_eq!(app.stock_of(widget).await, 2);
    assert_eq!(app.order_status(order_id).await, OrderStatus::Packing);
    assert!(app.movements_for(widget).await.is_empty());
}

#[tokio::test]
async fn removing_an_order_during_picking_shrinks_the_pick_list() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 20).await;
    let gadget = app.seed_product("Gadget", 20).await;
    let order_a = app.seed_order(&[(widget, 3), (gadget, 2)]).await;
    let order_b = app.seed_order(&[(widget, 3)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("create session");
    app.picking
        .update_picking_progress(session.id, app.store_id, widget, 6)
        .await
        .expect("pick widgets");

    let view = app
        .sessions
        .remove_order_from_session(session.id, order_a, app.store_id)
        .await
        .expect("remove order");
    assert_eq!(view.order_ids, vec![order_b]);
    assert_eq!(app.order_status(order_a).await, OrderStatus::Confirmed);

    // Widget requirement recomputed to order_b's share; the picked count is
    // clamped down to it. The gadget entry was only needed by order_a.
    let entry = app.pick_entry(session.id, widget).await;
    assert_eq!(entry.quantity_required, 3);
    assert_eq!(entry.quantity_picked, 3);
    let list = app
        .picking
        .get_picking_list(session.id, app.store_id)
        .await
        .expect("picking list");
    assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn removing_an_order_during_packing_returns_units_to_the_pool() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 20).await;
    let order_a = app.seed_order(&[(widget, 2)]).await;
    let order_b = app.seed_order(&[(widget, 2)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_a, order_b], app.user_id)
        .await
        .expect("create session");
    app.pick_everything(session.id).await;
    app.sessions
        .finish_picking(session.id, app.store_id)
        .await
        .expect("finish picking");
    for _ in 0..2 {
        app.packing
            .claim_pack_unit(session.id, app.store_id, order_b, widget)
            .await
            .expect("pack order b");
    }

    app.sessions
        .remove_order_from_session(session.id, order_b, app.store_id)
        .await
        .expect("remove packed order");

    // Order b's packed units return to the pool; the picked stock stays,
    // so completion still deducts the full physical pick of 4.
    let entry = app.pick_entry(session.id, widget).await;
    assert_eq!(entry.quantity_required, 2);
    assert_eq!(entry.quantity_picked, 4);
    assert_eq!(entry.units_assigned, 0);

    for _ in 0..2 {
        app.packing
            .claim_pack_unit(session.id, app.store_id, order_a, widget)
            .await
            .expect("pack order a");
    }
    app.sessions
        .complete_session(session.id, app.store_id)
        .await
        .expect("complete");
    assert_eq!(app.stock_of(widget).await, 16);
}

#[tokio::test]
async fn removing_the_last_order_abandons_the_session() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_id = app.seed_order(&[(widget, 1)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");

    let view = app
        .sessions
        .remove_order_from_session(session.id, order_id, app.store_id)
        .await
        .expect("remove last order");
    assert!(view.order_ids.is_empty());
    assert_eq!(app.session_status(session.id).await, SessionStatus::Abandoned);
    assert_eq!(app.order_status(order_id).await, OrderStatus::Confirmed);
}

#[tokio::test]
async fn sessions_are_scoped_to_their_store() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", 10).await;
    let order_id = app.seed_order(&[(widget, 1)]).await;
    let session = app
        .sessions
        .create_session(app.store_id, vec![order_id], app.user_id)
        .await
        .expect("create session");

    let other_store = uuid::Uuid::new_v4();
    let err = app
        .sessions
        .get_session(session.id, other_store)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SessionNotFound(_)));
}
