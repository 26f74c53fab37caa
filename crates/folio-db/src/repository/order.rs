//! # Order Repository
//!
//! Orders, their items, and the guarded updates the lifecycle performs.
//!
//! ## Guarded Updates
//! Every state change carries its precondition in the `WHERE` clause and
//! reports whether a row changed:
//!
//! ```text
//! mark_cancelled          WHERE status IN ('placed', 'processing')
//! cancel_item             WHERE cancellation_status = 'active'
//! mark_return_requested   WHERE return_status IS NULL
//! apply_review            WHERE return_status = 'pending'
//! advance_status          WHERE status = <expected current>
//! ```
//!
//! A `false` from any of these means another request got there first; the
//! service turns it into a state conflict and the transaction rolls back.
//!
//! Pricing columns of `order_items` are written once by [`insert_item`] and
//! never updated.

use chrono::{DateTime, Utc};
use folio_core::lifecycle::{CancellationPatch, OrderTotals, ReturnRequestPatch, ReviewPatch};
use folio_core::{Money, Order, OrderItem, OrderStatus, PaymentMethod, RefundStatus, ReturnStatus};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

const SELECT_ORDER: &str = r#"
    SELECT id, user_id, status, total_amount, product_discount, category_discount,
           coupon_discount, delivery_charge, final_total, original_subtotal,
           original_coupon_discount, coupon_code, payment_method, has_pending_returns,
           cancellation_reason, return_reason, refund_status, refund_amount, refunded_at,
           refunded_to_wallet, created_at, updated_at, delivered_at
    FROM orders
"#;

const SELECT_ITEM: &str = r#"
    SELECT id, order_id, book_id, quantity, price, product_discount, category_discount,
           coupon_discount, total, return_requested, return_status, return_reason,
           return_requested_at, item_condition, rejection_reason, refund_status,
           refund_amount, refunded_at, cancellation_status, stock_restored
    FROM order_items
"#;

// =============================================================================
// Inserts
// =============================================================================

/// Order header captured at checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub total_amount: Money,
    pub product_discount: Money,
    pub category_discount: Money,
    pub coupon_discount: Money,
    pub delivery_charge: Money,
    pub final_total: Money,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
}

/// One line captured at checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub book_id: i64,
    pub quantity: i64,
    pub price: Money,
    pub product_discount: Money,
    pub category_discount: Money,
    pub coupon_discount: Money,
    pub total: Money,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order reads outside a service transaction.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn get_order(&self, order_id: i64) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, order_id).await
    }

    /// Items of an order in checkout order.
    pub async fn get_items(&self, order_id: i64) -> DbResult<Vec<OrderItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_items(&mut conn, order_id).await
    }

    /// All orders of a user, newest first.
    pub async fn orders_for_user(&self, user_id: i64) -> DbResult<Vec<Order>> {
        let sql = format!("{SELECT_ORDER} WHERE user_id = ?1 ORDER BY id DESC");
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    /// Overrides `delivered_at` (imports and tests that need an old delivery).
    pub async fn set_delivered_at(&self, order_id: i64, delivered_at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE orders SET delivered_at = ?2 WHERE id = ?1")
            .bind(order_id)
            .bind(delivered_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", order_id));
        }
        Ok(())
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

/// Inserts the order header. `original_*` columns are copied from the
/// current ones and never change afterwards.
pub async fn insert_order(conn: &mut SqliteConnection, order: &NewOrder, now: DateTime<Utc>) -> DbResult<i64> {
    let original_subtotal = order.total_amount - order.product_discount - order.category_discount;

    let id = sqlx::query(
        r#"
        INSERT INTO orders (
            user_id, status, total_amount, product_discount, category_discount,
            coupon_discount, delivery_charge, final_total, original_subtotal,
            original_coupon_discount, coupon_code, payment_method, has_pending_returns,
            refund_amount, refunded_to_wallet, created_at, updated_at
        ) VALUES (?1, 'placed', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?5, ?9, ?10, 0, '0', 0, ?11, ?11)
        "#,
    )
    .bind(order.user_id)
    .bind(order.total_amount)
    .bind(order.product_discount)
    .bind(order.category_discount)
    .bind(order.coupon_discount)
    .bind(order.delivery_charge)
    .bind(order.final_total)
    .bind(original_subtotal)
    .bind(&order.coupon_code)
    .bind(order.payment_method)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(order_id = id, user_id = order.user_id, "Order row inserted");
    Ok(id)
}

pub async fn insert_item(conn: &mut SqliteConnection, order_id: i64, item: &NewOrderItem) -> DbResult<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO order_items (
            order_id, book_id, quantity, price, product_discount, category_discount,
            coupon_discount, total, return_requested, refund_amount,
            cancellation_status, stock_restored
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, '0', 'active', 0)
        "#,
    )
    .bind(order_id)
    .bind(item.book_id)
    .bind(item.quantity)
    .bind(item.price)
    .bind(item.product_discount)
    .bind(item.category_discount)
    .bind(item.coupon_discount)
    .bind(item.total)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn fetch_order(conn: &mut SqliteConnection, order_id: i64) -> DbResult<Option<Order>> {
    let sql = format!("{SELECT_ORDER} WHERE id = ?1");
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

/// The order only if it belongs to `user_id`.
pub async fn fetch_order_for_user(
    conn: &mut SqliteConnection,
    order_id: i64,
    user_id: i64,
) -> DbResult<Option<Order>> {
    let sql = format!("{SELECT_ORDER} WHERE id = ?1 AND user_id = ?2");
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

pub async fn fetch_items(conn: &mut SqliteConnection, order_id: i64) -> DbResult<Vec<OrderItem>> {
    let sql = format!("{SELECT_ITEM} WHERE order_id = ?1 ORDER BY id");
    let items = sqlx::query_as::<_, OrderItem>(&sql)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(items)
}

/// The item only if it belongs to `order_id`.
pub async fn fetch_item(
    conn: &mut SqliteConnection,
    order_id: i64,
    item_id: i64,
) -> DbResult<Option<OrderItem>> {
    let sql = format!("{SELECT_ITEM} WHERE id = ?1 AND order_id = ?2");
    let item = sqlx::query_as::<_, OrderItem>(&sql)
        .bind(item_id)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(item)
}

/// Moves `order_id` from `from` to `to`. Reaching `Delivered` stamps
/// `delivered_at`.
pub async fn advance_status(
    conn: &mut SqliteConnection,
    order_id: i64,
    from: OrderStatus,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let delivered_at = (to == OrderStatus::Delivered).then_some(now);

    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = ?3, updated_at = ?4, delivered_at = COALESCE(?5, delivered_at)
        WHERE id = ?1 AND status = ?2
        "#,
    )
    .bind(order_id)
    .bind(from)
    .bind(to)
    .bind(now)
    .bind(delivered_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Writes the order's current monetary columns.
pub async fn update_totals(
    conn: &mut SqliteConnection,
    order_id: i64,
    totals: &OrderTotals,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET total_amount = ?2, product_discount = ?3, category_discount = ?4,
            coupon_discount = ?5, delivery_charge = ?6, final_total = ?7, updated_at = ?8
        WHERE id = ?1
        "#,
    )
    .bind(order_id)
    .bind(totals.total_amount)
    .bind(totals.product_discount)
    .bind(totals.category_discount)
    .bind(totals.coupon_discount)
    .bind(totals.delivery_charge)
    .bind(totals.final_total)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(order_id, final_total = %totals.final_total, "Order totals updated");
    Ok(())
}

/// Cancels an order that is still `placed` or `processing`.
pub async fn mark_cancelled(
    conn: &mut SqliteConnection,
    patch: &CancellationPatch,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = 'cancelled', cancellation_reason = ?2, refund_status = ?3,
            refund_amount = ?4, refunded_at = ?5, refunded_to_wallet = ?6, updated_at = ?7
        WHERE id = ?1 AND status IN ('placed', 'processing')
        "#,
    )
    .bind(patch.order_id)
    .bind(&patch.reason)
    .bind(patch.refund_status)
    .bind(patch.refund_amount)
    .bind(patch.refunded_at)
    .bind(patch.refunded_to_wallet)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks every still-active line of the order cancelled and restocked.
pub async fn cancel_all_items(conn: &mut SqliteConnection, order_id: i64) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE order_items
        SET cancellation_status = 'cancelled', stock_restored = 1
        WHERE order_id = ?1 AND cancellation_status = 'active'
        "#,
    )
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Cancels one active line and records what was refunded for it.
pub async fn cancel_item(
    conn: &mut SqliteConnection,
    item_id: i64,
    refund_status: Option<RefundStatus>,
    refund_amount: Money,
    refunded_at: Option<DateTime<Utc>>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE order_items
        SET cancellation_status = 'cancelled', stock_restored = 1,
            refund_status = ?2, refund_amount = ?3, refunded_at = ?4
        WHERE id = ?1 AND cancellation_status = 'active'
        "#,
    )
    .bind(item_id)
    .bind(refund_status)
    .bind(refund_amount)
    .bind(refunded_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Opens a return on an item that has none.
pub async fn mark_return_requested(conn: &mut SqliteConnection, patch: &ReturnRequestPatch) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE order_items
        SET return_requested = 1, return_status = 'pending', return_reason = ?2,
            return_requested_at = ?3, refund_amount = ?4, refund_status = 'pending'
        WHERE id = ?1 AND return_status IS NULL AND cancellation_status = 'active'
        "#,
    )
    .bind(patch.item_id)
    .bind(&patch.reason)
    .bind(patch.requested_at)
    .bind(patch.refund_amount)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Moves a delivered order into `return_requested` for a whole-order return.
pub async fn mark_order_return_requested(
    conn: &mut SqliteConnection,
    order_id: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = 'return_requested', return_reason = ?2, has_pending_returns = 1,
            updated_at = ?3
        WHERE id = ?1 AND status = 'delivered'
        "#,
    )
    .bind(order_id)
    .bind(reason)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Sets the order's pending-returns flag and status.
pub async fn set_return_state(
    conn: &mut SqliteConnection,
    order_id: i64,
    has_pending_returns: bool,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET has_pending_returns = ?2, status = ?3, updated_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(order_id)
    .bind(has_pending_returns)
    .bind(status)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Resolves a pending return. Approval completes the refund; rejection
/// zeroes the amount that was quoted at request time.
pub async fn apply_review(conn: &mut SqliteConnection, patch: &ReviewPatch) -> DbResult<bool> {
    let approved = patch.return_status == ReturnStatus::Approved;
    let refund_status = approved.then_some(RefundStatus::Completed);

    let result = sqlx::query(
        r#"
        UPDATE order_items
        SET return_status = ?2, item_condition = ?3, rejection_reason = ?4,
            refunded_at = ?5, stock_restored = ?6, refund_status = ?7,
            refund_amount = CASE WHEN ?8 THEN refund_amount ELSE '0' END
        WHERE id = ?1 AND return_status = 'pending'
        "#,
    )
    .bind(patch.item_id)
    .bind(patch.return_status)
    .bind(patch.item_condition)
    .bind(&patch.rejection_reason)
    .bind(patch.refunded_at)
    .bind(patch.stock_restored)
    .bind(refund_status)
    .bind(approved)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Records money sent back for the order so far.
pub async fn record_refund(
    conn: &mut SqliteConnection,
    order_id: i64,
    refunded_total: Money,
    refund_status: RefundStatus,
    refunded_to_wallet: bool,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET refund_amount = ?2, refund_status = ?3, refunded_to_wallet = ?4,
            refunded_at = ?5, updated_at = ?5
        WHERE id = ?1
        "#,
    )
    .bind(order_id)
    .bind(refunded_total)
    .bind(refund_status)
    .bind(refunded_to_wallet)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(order_id, refunded_total = %refunded_total, "Order refund recorded");
    Ok(())
}

/// Items awaiting an admin decision, oldest request first.
pub async fn pending_returns(conn: &mut SqliteConnection) -> DbResult<Vec<OrderItem>> {
    let sql = format!("{SELECT_ITEM} WHERE return_status = 'pending' ORDER BY return_requested_at, id");
    let items = sqlx::query_as::<_, OrderItem>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(items)
}
