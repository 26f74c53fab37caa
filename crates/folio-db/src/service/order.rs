//! # Order Service
//!
//! Checkout and every post-checkout transition. Each operation is one
//! transaction: restock, ledger posting and order update commit together
//! or not at all.
//!
//! ## Money Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  checkout        cart ──► order snapshot, stock −q, coupon consumed,   │
//! │                  wallet −final_total (wallet payment only)              │
//! │                                                                         │
//! │  cancel_order    stock +q for every line                                │
//! │                  prepaid: wallet +final_total   REFUND-ORDER-<o>-CANCEL │
//! │                  COD:     refund not_applicable                         │
//! │                                                                         │
//! │  cancel_item     stock +q, coupon share unwound by original ratio       │
//! │                  prepaid: wallet +drop  REFUND-ORDER-<o>-ITEM-<i>-CANCEL│
//! │                                                                         │
//! │  return_*        item ──► pending, refund amount quoted, nothing moves  │
//! │                                                                         │
//! │  review approve  stock +q if good, totals −(total − coupon share)       │
//! │                  wallet +refund             REFUND-ORDER-<o>-ITEM-<i>   │
//! │  review reject   reason recorded, nothing moves                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Customers only ever see their own orders; any other order id is
//! reported as not found.

use chrono::{DateTime, Utc};
use folio_core::coupon::{self as coupon_rules, allocate, AllocationLine};
use folio_core::lifecycle::{
    cancel_reference, item_cancel_reference, item_refund_reference, payment_reference,
    prorated_coupon_share, settled_status, CancellationPatch, CheckoutRequest, OrderTotals,
    ReturnRequestPatch, ReviewDecision, ReviewPatch, StatusUpdate,
};
use folio_core::outcome::{
    CancelOutcome, CheckoutOutcome, OrderView, PendingReturnView, ReturnOutcome, ReviewOutcome,
};
use folio_core::validation::{validate_optional_reason, validate_reason};
use folio_core::{
    CancellationStatus, Caller, CoreError, ItemCondition, Money, Order, OrderItem, OrderPolicy,
    OrderStatus, PaymentMethod, PriceBreakdown, RefundStatus, ReturnStatus, Role,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::{DbError, ServiceResult};
use crate::repository::order::{self as orders, NewOrder, NewOrderItem};
use crate::repository::wallet::{self, LedgerEntry, Posting};
use crate::repository::{cart, catalog, coupon};
use crate::service::cart::price_cart;

/// Order lifecycle operations.
#[derive(Debug, Clone)]
pub struct OrderService {
    pool: SqlitePool,
    policy: OrderPolicy,
}

impl OrderService {
    pub fn new(pool: SqlitePool, policy: OrderPolicy) -> Self {
        OrderService { pool, policy }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Turns the caller's cart into an order, capturing pricing once.
    pub async fn checkout(
        &self,
        caller: Caller,
        request: CheckoutRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<CheckoutOutcome> {
        request.check()?;
        let user_id = caller.user_id;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let priced = price_cart(&mut tx, user_id, now).await?;
        if priced.pricing.is_empty() {
            return Err(CoreError::CartEmpty.into());
        }

        for (line, book) in priced.pricing.lines.iter().zip(&priced.books) {
            if line.can_checkout {
                continue;
            }
            warn!(user_id, book_id = book.id, "Checkout blocked by unavailable book");
            if book.is_active && !book.blocked {
                return Err(CoreError::InsufficientStock {
                    book_id: book.id,
                    available: book.stock,
                    requested: line.quantity,
                }
                .into());
            }
            return Err(CoreError::BookUnavailable { book_id: book.id }.into());
        }

        // The applied coupon must still qualify; the shopper removes it otherwise.
        let mut applied = None;
        if let Some(active) = coupon::fetch_active(&mut tx, user_id).await? {
            let found = coupon::fetch_by_id(&mut tx, active.coupon_id)
                .await?
                .ok_or_else(|| CoreError::CouponNotFound {
                    code: active.code.clone(),
                })?;
            let already_used = coupon::has_redeemed(&mut tx, user_id, found.id).await?;
            let quote = coupon_rules::quote(&found, already_used, &priced.pricing, now)?;
            applied = Some((found, quote));
        }

        let pricing = &priced.pricing;
        let coupon_discount = applied.as_ref().map(|(_, q)| q.discount).unwrap_or_default();
        let allocation: Vec<AllocationLine> = pricing
            .lines
            .iter()
            .map(|l| AllocationLine {
                quantity: l.quantity,
                cap: l.line_final,
            })
            .collect();
        let shares = allocate(coupon_discount, &allocation);
        let final_total = pricing.final_total(coupon_discount) + request.delivery_charge;

        for line in &pricing.lines {
            if !catalog::reserve_stock(&mut tx, line.book_id, line.quantity).await? {
                let available = catalog::fetch_book(&mut tx, line.book_id)
                    .await?
                    .map_or(0, |b| b.stock);
                warn!(user_id, book_id = line.book_id, available, "Stock reservation lost");
                return Err(CoreError::InsufficientStock {
                    book_id: line.book_id,
                    available,
                    requested: line.quantity,
                }
                .into());
            }
        }

        let order_id = orders::insert_order(
            &mut tx,
            &NewOrder {
                user_id,
                total_amount: pricing.subtotal,
                product_discount: pricing.product_discount_total,
                category_discount: pricing.category_discount_total,
                coupon_discount,
                delivery_charge: request.delivery_charge,
                final_total,
                coupon_code: applied.as_ref().map(|(c, _)| c.code.clone()),
                payment_method: request.payment_method,
            },
            now,
        )
        .await?;

        for (line, share) in pricing.lines.iter().zip(&shares) {
            orders::insert_item(
                &mut tx,
                order_id,
                &NewOrderItem {
                    book_id: line.book_id,
                    quantity: line.quantity,
                    price: line.unit_price,
                    product_discount: line.product_discount,
                    category_discount: line.category_discount,
                    coupon_discount: *share,
                    total: line.line_final,
                },
            )
            .await?;
        }

        if let Some((found, _)) = &applied {
            if !coupon::consume(&mut tx, found.id, user_id, order_id, now).await? {
                warn!(user_id, coupon_id = found.id, "Coupon exhausted during checkout");
                return Err(CoreError::CouponUsageLimitExceeded {
                    code: found.code.clone(),
                    limit: found.usage_limit,
                }
                .into());
            }
        }

        if request.payment_method == PaymentMethod::Wallet && final_total.is_positive() {
            let wallet = wallet::ensure_wallet(&mut tx, user_id, now).await?;
            let reference = payment_reference(order_id);
            wallet::debit(
                &mut tx,
                &Posting {
                    wallet_id: wallet.id,
                    amount: final_total,
                    description: &format!("Payment for order #{order_id}"),
                    order_id: Some(order_id),
                    reference: &reference,
                },
                now,
            )
            .await?;
        }

        cart::clear_cart(&mut tx, user_id).await?;

        tx.commit().await.map_err(DbError::transaction)?;

        info!(
            order_id,
            user_id,
            payment_method = ?request.payment_method,
            coupon_discount = %coupon_discount,
            final_total = %final_total,
            "Order placed"
        );

        Ok(CheckoutOutcome {
            order_id,
            status: OrderStatus::Placed,
            payment_method: request.payment_method,
            coupon_code: applied.map(|(c, _)| c.code),
            delivery_charge: request.delivery_charge.to_fixed(),
            breakdown: PriceBreakdown::from_parts(
                pricing.subtotal,
                pricing.product_discount_total,
                pricing.category_discount_total,
                coupon_discount,
                final_total,
            ),
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The order with its lines and current breakdown.
    pub async fn get_order(&self, caller: Caller, order_id: i64) -> ServiceResult<OrderView> {
        let mut conn = self.pool.acquire().await?;
        let order = load_visible(&mut conn, caller, order_id).await?;
        let items = orders::fetch_items(&mut conn, order_id).await?;
        Ok(OrderView::new(&order, &items))
    }

    /// Items awaiting an admin decision, oldest request first. Admin only.
    pub async fn pending_returns(&self, caller: Caller) -> ServiceResult<Vec<PendingReturnView>> {
        caller.require_admin()?;
        let mut conn = self.pool.acquire().await?;
        let items = orders::pending_returns(&mut conn).await?;
        Ok(items.iter().map(PendingReturnView::from).collect())
    }

    // =========================================================================
    // Fulfilment
    // =========================================================================

    /// Moves an order one fulfilment step forward. Admin only.
    pub async fn update_status(
        &self,
        caller: Caller,
        order_id: i64,
        update: StatusUpdate,
        now: DateTime<Utc>,
    ) -> ServiceResult<OrderView> {
        caller.require_admin()?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let order = orders::fetch_order(&mut tx, order_id)
            .await?
            .ok_or(CoreError::OrderNotFound { order_id })?;
        update.check(&order)?;

        if !orders::advance_status(&mut tx, order_id, order.status, update.status, now).await? {
            return Err(CoreError::InvalidOrderStatus {
                order_id,
                current_status: order.status,
                operation: "advance",
            }
            .into());
        }

        let view = reload_view(&mut tx, order_id).await?;
        tx.commit().await.map_err(DbError::transaction)?;

        info!(order_id, from = ?order.status, to = ?update.status, "Order status advanced");
        Ok(view)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels the whole order within the cancellation window.
    pub async fn cancel_order(
        &self,
        caller: Caller,
        order_id: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<CancelOutcome> {
        let reason = validate_optional_reason("cancellation_reason", reason)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let order = load_owned(&mut tx, caller, order_id).await?;
        if let Err(err) = self.policy.check_cancellable(&order, now) {
            warn!(order_id, reason = err.code(), "Cancellation rejected");
            return Err(err.into());
        }

        let items = orders::fetch_items(&mut tx, order_id).await?;
        let outcome = cancel_whole(&mut tx, &order, &items, reason, now).await?;

        tx.commit().await.map_err(DbError::transaction)?;
        Ok(outcome)
    }

    /// Cancels one line. Cancelling the last active line cancels the order.
    pub async fn cancel_item(
        &self,
        caller: Caller,
        order_id: i64,
        item_id: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<CancelOutcome> {
        let reason = validate_optional_reason("cancellation_reason", reason)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let order = load_owned(&mut tx, caller, order_id).await?;
        if let Err(err) = self.policy.check_cancellable(&order, now) {
            warn!(order_id, item_id, reason = err.code(), "Item cancellation rejected");
            return Err(err.into());
        }

        let items = orders::fetch_items(&mut tx, order_id).await?;
        let item = items
            .iter()
            .find(|i| i.id == item_id)
            .ok_or(CoreError::OrderItemNotFound { item_id })?;
        if item.cancellation_status == CancellationStatus::Cancelled {
            return Err(CoreError::ItemAlreadyCancelled { item_id }.into());
        }

        if items.iter().filter(|i| i.is_live()).count() == 1 {
            let mut outcome = cancel_whole(&mut tx, &order, &items, reason, now).await?;
            tx.commit().await.map_err(DbError::transaction)?;
            outcome.item_id = Some(item_id);
            return Ok(outcome);
        }

        let coupon_removed = prorated_coupon_share(&order, item);
        let current = OrderTotals::of(&order);
        let totals = current.without_line(item, coupon_removed);
        let dropped = current.final_total - totals.final_total;

        catalog::restock(&mut tx, item.book_id, item.quantity).await?;

        let prepaid = order.payment_method.is_prepaid();
        let (refund_status, refund_amount, refunded_at) = if prepaid {
            (RefundStatus::Completed, dropped, Some(now))
        } else {
            (RefundStatus::NotApplicable, Money::zero(), None)
        };

        if !orders::cancel_item(&mut tx, item_id, Some(refund_status), refund_amount, refunded_at).await? {
            return Err(CoreError::ItemAlreadyCancelled { item_id }.into());
        }
        orders::update_totals(&mut tx, order_id, &totals, now).await?;

        if prepaid && refund_amount.is_positive() {
            let reference = item_cancel_reference(order_id, item_id);
            credit_refund(
                &mut tx,
                order.user_id,
                refund_amount,
                &format!("Refund for cancelled item #{item_id} of order #{order_id}"),
                order_id,
                &reference,
                now,
            )
            .await?;
            orders::record_refund(
                &mut tx,
                order_id,
                order.refund_amount + refund_amount,
                RefundStatus::Completed,
                true,
                now,
            )
            .await?;
        }

        let updated = reload_order(&mut tx, order_id).await?;
        tx.commit().await.map_err(DbError::transaction)?;

        info!(
            order_id,
            item_id,
            reason = reason.as_deref().unwrap_or(""),
            coupon_removed = %coupon_removed,
            refund_amount = %refund_amount,
            final_total = %updated.final_total,
            "Order item cancelled"
        );

        Ok(CancelOutcome {
            order_id,
            item_id: Some(item_id),
            status: updated.status,
            refund_status,
            refund_amount: refund_amount.to_fixed(),
            restocked_units: item.quantity,
            breakdown: PriceBreakdown::for_order(&updated),
        })
    }

    // =========================================================================
    // Returns
    // =========================================================================

    /// Requests a return of every active line. The order moves to
    /// `ReturnRequested`; refunds wait for admin review.
    pub async fn return_order(
        &self,
        caller: Caller,
        order_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReturnOutcome> {
        let reason = validate_reason("return_reason", reason)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let order = load_owned(&mut tx, caller, order_id).await?;
        let items: Vec<OrderItem> = orders::fetch_items(&mut tx, order_id)
            .await?
            .into_iter()
            .filter(OrderItem::is_live)
            .collect();

        for item in &items {
            self.check_returnable(&mut tx, &order, item, now).await?;
        }

        let mut pending_refund = Money::zero();
        for item in &items {
            let patch = ReturnRequestPatch::new(item, &reason, now);
            pending_refund += patch.refund_amount;
            mark_requested(&mut tx, &patch).await?;
        }

        if !orders::mark_order_return_requested(&mut tx, order_id, &reason, now).await? {
            return Err(CoreError::InvalidOrderStatus {
                order_id,
                current_status: order.status,
                operation: "return",
            }
            .into());
        }

        let updated = reload_order(&mut tx, order_id).await?;
        tx.commit().await.map_err(DbError::transaction)?;

        info!(order_id, items = items.len(), pending_refund = %pending_refund, "Order return requested");

        Ok(ReturnOutcome {
            order_id,
            item_ids: items.iter().map(|i| i.id).collect(),
            status: updated.status,
            pending_refund: pending_refund.to_fixed(),
            breakdown: PriceBreakdown::for_order(&updated),
        })
    }

    /// Requests a return of one line. The order stays `Delivered`.
    pub async fn return_item(
        &self,
        caller: Caller,
        order_id: i64,
        item_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReturnOutcome> {
        let reason = validate_reason("return_reason", reason)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let order = load_owned(&mut tx, caller, order_id).await?;
        let item = orders::fetch_item(&mut tx, order_id, item_id)
            .await?
            .ok_or(CoreError::OrderItemNotFound { item_id })?;

        self.check_returnable(&mut tx, &order, &item, now).await?;

        let patch = ReturnRequestPatch::new(&item, &reason, now);
        mark_requested(&mut tx, &patch).await?;
        orders::set_return_state(&mut tx, order_id, true, order.status, now).await?;

        let updated = reload_order(&mut tx, order_id).await?;
        tx.commit().await.map_err(DbError::transaction)?;

        info!(order_id, item_id, pending_refund = %patch.refund_amount, "Item return requested");

        Ok(ReturnOutcome {
            order_id,
            item_ids: vec![item_id],
            status: updated.status,
            pending_refund: patch.refund_amount.to_fixed(),
            breakdown: PriceBreakdown::for_order(&updated),
        })
    }

    /// Approves or rejects a pending item return. Admin only.
    ///
    /// Approval restocks a resellable item, takes the line off the order's
    /// totals, and credits the quoted refund under a reference unique to
    /// the item.
    pub async fn review_return(
        &self,
        caller: Caller,
        order_id: i64,
        item_id: i64,
        decision: ReviewDecision,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReviewOutcome> {
        caller.require_admin()?;

        let rejection_reason = match &decision {
            ReviewDecision::Reject { reason } => Some(validate_reason("rejection_reason", reason)?),
            ReviewDecision::Approve { .. } => None,
        };

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let order = orders::fetch_order(&mut tx, order_id)
            .await?
            .ok_or(CoreError::OrderNotFound { order_id })?;
        let item = orders::fetch_item(&mut tx, order_id, item_id)
            .await?
            .ok_or(CoreError::OrderItemNotFound { item_id })?;
        if !item.has_pending_return() {
            return Err(CoreError::NoPendingReturn { item_id }.into());
        }

        let (patch, refund) = match decision {
            ReviewDecision::Approve { condition } => {
                let restock = condition == ItemCondition::Good;
                let patch = ReviewPatch {
                    item_id,
                    return_status: ReturnStatus::Approved,
                    item_condition: Some(condition),
                    rejection_reason: None,
                    refunded_at: Some(now),
                    stock_restored: restock,
                };
                (patch, item.refund_amount)
            }
            ReviewDecision::Reject { .. } => {
                let patch = ReviewPatch {
                    item_id,
                    return_status: ReturnStatus::Rejected,
                    item_condition: None,
                    rejection_reason,
                    refunded_at: None,
                    stock_restored: false,
                };
                (patch, Money::zero())
            }
        };

        if !orders::apply_review(&mut tx, &patch).await? {
            return Err(CoreError::NoPendingReturn { item_id }.into());
        }

        if patch.return_status == ReturnStatus::Approved {
            if patch.stock_restored {
                catalog::restock(&mut tx, item.book_id, item.quantity).await?;
            }

            let totals = OrderTotals::of(&order).without_line(&item, item.coupon_discount);
            orders::update_totals(&mut tx, order_id, &totals, now).await?;

            if refund.is_positive() {
                let reference = item_refund_reference(order_id, item_id);
                credit_refund(
                    &mut tx,
                    order.user_id,
                    refund,
                    &format!("Refund for returned item #{item_id} of order #{order_id}"),
                    order_id,
                    &reference,
                    now,
                )
                .await?;
                orders::record_refund(
                    &mut tx,
                    order_id,
                    order.refund_amount + refund,
                    RefundStatus::Completed,
                    true,
                    now,
                )
                .await?;
            }
        }

        let current = reload_order(&mut tx, order_id).await?;
        let items = orders::fetch_items(&mut tx, order_id).await?;
        let has_pending_returns = items.iter().any(OrderItem::has_pending_return);
        let status = settled_status(&current, &items);
        orders::set_return_state(&mut tx, order_id, has_pending_returns, status, now).await?;

        let updated = reload_order(&mut tx, order_id).await?;
        tx.commit().await.map_err(DbError::transaction)?;

        info!(
            order_id,
            item_id,
            decision = ?patch.return_status,
            refund = %refund,
            restocked = patch.stock_restored,
            order_status = ?updated.status,
            "Return reviewed"
        );

        Ok(ReviewOutcome {
            order_id,
            item_id,
            return_status: patch.return_status,
            refund_status: (patch.return_status == ReturnStatus::Approved)
                .then_some(RefundStatus::Completed),
            refund_amount: refund.to_fixed(),
            restocked: patch.stock_restored,
            order_status: updated.status,
            has_pending_returns: updated.has_pending_returns,
            breakdown: PriceBreakdown::for_order(&updated),
        })
    }

    async fn check_returnable(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        item: &OrderItem,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let category = match catalog::fetch_book(conn, item.book_id).await? {
            Some(book) => catalog::fetch_category(conn, book.category_id).await?,
            None => None,
        };
        let window_days = self.policy.return_window_days(category.as_ref());

        if let Err(err) = self.policy.check_item_returnable(order, item, window_days, now) {
            warn!(order_id = order.id, item_id = item.id, reason = err.code(), "Return rejected");
            return Err(err.into());
        }
        Ok(())
    }
}

// =============================================================================
// Helpers (run inside the caller's transaction)
// =============================================================================

/// Whole-order cancellation after the guards have passed.
async fn cancel_whole(
    conn: &mut SqliteConnection,
    order: &Order,
    items: &[OrderItem],
    reason: Option<String>,
    now: DateTime<Utc>,
) -> ServiceResult<CancelOutcome> {
    let mut restocked_units = 0;
    for item in items.iter().filter(|i| i.is_live()) {
        catalog::restock(conn, item.book_id, item.quantity).await?;
        restocked_units += item.quantity;
    }

    let prepaid = order.payment_method.is_prepaid();
    let refund = if prepaid { order.final_total } else { Money::zero() };

    let patch = CancellationPatch {
        order_id: order.id,
        reason,
        refund_status: if prepaid {
            RefundStatus::Completed
        } else {
            RefundStatus::NotApplicable
        },
        refund_amount: order.refund_amount + refund,
        refunded_at: prepaid.then_some(now),
        refunded_to_wallet: prepaid,
    };

    if !orders::mark_cancelled(conn, &patch, now).await? {
        return Err(CoreError::InvalidOrderStatus {
            order_id: order.id,
            current_status: order.status,
            operation: "cancel",
        }
        .into());
    }
    orders::cancel_all_items(conn, order.id).await?;

    if refund.is_positive() {
        let reference = cancel_reference(order.id);
        credit_refund(
            conn,
            order.user_id,
            refund,
            &format!("Refund for cancelled order #{}", order.id),
            order.id,
            &reference,
            now,
        )
        .await?;
    }

    let updated = reload_order(conn, order.id).await?;

    info!(
        order_id = order.id,
        payment_method = ?order.payment_method,
        refund = %refund,
        restocked_units,
        "Order cancelled"
    );

    Ok(CancelOutcome {
        order_id: order.id,
        item_id: None,
        status: updated.status,
        refund_status: patch.refund_status,
        refund_amount: refund.to_fixed(),
        restocked_units,
        breakdown: PriceBreakdown::for_order(&updated),
    })
}

async fn credit_refund(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Money,
    description: &str,
    order_id: i64,
    reference: &str,
    now: DateTime<Utc>,
) -> ServiceResult<LedgerEntry> {
    let wallet = wallet::ensure_wallet(conn, user_id, now).await?;
    wallet::credit(
        conn,
        &Posting {
            wallet_id: wallet.id,
            amount,
            description,
            order_id: Some(order_id),
            reference,
        },
        now,
    )
    .await
}

async fn mark_requested(conn: &mut SqliteConnection, patch: &ReturnRequestPatch) -> ServiceResult<()> {
    if !orders::mark_return_requested(conn, patch).await? {
        return Err(CoreError::ReturnAlreadyRequested {
            item_id: patch.item_id,
            current_status: ReturnStatus::Pending,
        }
        .into());
    }
    Ok(())
}

/// Customers see only their own orders; admins see all.
async fn load_visible(conn: &mut SqliteConnection, caller: Caller, order_id: i64) -> ServiceResult<Order> {
    let order = match caller.role {
        Role::Admin => orders::fetch_order(conn, order_id).await?,
        Role::Customer => orders::fetch_order_for_user(conn, order_id, caller.user_id).await?,
    };
    order.ok_or_else(|| CoreError::OrderNotFound { order_id }.into())
}

/// The caller's own order, whatever their role.
async fn load_owned(conn: &mut SqliteConnection, caller: Caller, order_id: i64) -> ServiceResult<Order> {
    orders::fetch_order_for_user(conn, order_id, caller.user_id)
        .await?
        .ok_or_else(|| CoreError::OrderNotFound { order_id }.into())
}

async fn reload_order(conn: &mut SqliteConnection, order_id: i64) -> ServiceResult<Order> {
    orders::fetch_order(conn, order_id)
        .await?
        .ok_or_else(|| DbError::not_found("Order", order_id).into())
}

async fn reload_view(conn: &mut SqliteConnection, order_id: i64) -> ServiceResult<OrderView> {
    let order = reload_order(conn, order_id).await?;
    let items = orders::fetch_items(conn, order_id).await?;
    Ok(OrderView::new(&order, &items))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, TimeZone};
    use folio_core::coupon::NewCoupon;
    use folio_core::{Book, CouponType, ErrorKind, TransactionType};

    const ADMIN: Caller = Caller::admin(900);
    const USER: Caller = Caller::customer(1);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap()
    }

    fn m(raw: &str) -> Money {
        Money::parse(raw).unwrap()
    }

    async fn db_with_books(prices: &[i64]) -> (Database, Vec<Book>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cat = db.catalog().insert_category("Fiction", None).await.unwrap();
        let mut books = Vec::new();
        for (n, price) in prices.iter().enumerate() {
            let book = db
                .catalog()
                .insert_book(&format!("Book {n}"), Money::from_major(*price), 10, cat.id)
                .await
                .unwrap();
            books.push(book);
        }
        (db, books)
    }

    async fn place(db: &Database, books: &[Book], payment_method: PaymentMethod) -> CheckoutOutcome {
        for book in books {
            db.cart_service().add_item(USER, book.id, 1, t0()).await.unwrap();
        }
        db.order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method,
                    delivery_charge: Money::zero(),
                },
                t0(),
            )
            .await
            .unwrap()
    }

    async fn deliver(db: &Database, order_id: i64, at: DateTime<Utc>) {
        for status in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            db.order_service()
                .update_status(ADMIN, order_id, StatusUpdate { status }, at)
                .await
                .unwrap();
        }
    }

    async fn flat_coupon(db: &Database, code: &str, value: i64) {
        db.coupon_service()
            .create_coupon(
                ADMIN,
                NewCoupon {
                    code: code.to_string(),
                    coupon_type: CouponType::Flat,
                    value: Money::from_major(value),
                    min_order_value: Money::zero(),
                    max_discount: Money::zero(),
                    expiry: t0() + Duration::days(30),
                    usage_limit: 5,
                },
                t0(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkout_snapshots_and_consumes_coupon() {
        let (db, books) = db_with_books(&[100, 200]).await;
        flat_coupon(&db, "THIRTY", 30).await;
        for book in &books {
            db.cart_service().add_item(USER, book.id, 1, t0()).await.unwrap();
        }
        db.coupon_service().apply(USER, "THIRTY", t0()).await.unwrap();

        let placed = db
            .order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method: PaymentMethod::Online,
                    delivery_charge: m("40"),
                },
                t0(),
            )
            .await
            .unwrap();

        assert_eq!(placed.coupon_code.as_deref(), Some("THIRTY"));
        assert_eq!(placed.breakdown.coupon_discount, "30.00");
        assert_eq!(placed.breakdown.final_total, "310.00");
        assert_eq!(placed.delivery_charge, "40.00");

        let items = db.orders().get_items(placed.order_id).await.unwrap();
        let shares: Money = items.iter().map(|i| i.coupon_discount).sum();
        assert_eq!(shares, Money::from_major(30));

        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 9);
        assert!(db.carts().get_cart(1).await.unwrap().is_empty());
        assert!(db.coupons().active_for(1).await.unwrap().is_none());
        let coupon = db.coupons().get_by_code("THIRTY").await.unwrap().unwrap();
        assert_eq!(coupon.used_count, 1);
        assert_eq!(db.coupons().redemptions(1).await.unwrap().len(), 1);

        // Same user cannot use it again.
        db.cart_service().add_item(USER, books[0].id, 1, t0()).await.unwrap();
        let err = db.coupon_service().apply(USER, "THIRTY", t0()).await.unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::CouponAlreadyUsed { .. })));
    }

    #[tokio::test]
    async fn test_checkout_rejects_empty_cart_and_short_wallet() {
        let (db, books) = db_with_books(&[50]).await;

        let err = db
            .order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method: PaymentMethod::Cod,
                    delivery_charge: Money::zero(),
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::CartEmpty)));

        db.cart_service().add_item(USER, books[0].id, 1, t0()).await.unwrap();
        let err = db
            .order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method: PaymentMethod::Wallet,
                    delivery_charge: Money::zero(),
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::InsufficientBalance { .. })));

        // Rolled back: stock untouched, cart intact.
        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 10);
        assert_eq!(db.carts().get_cart(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_checkout_debits_once() {
        let (db, books) = db_with_books(&[80]).await;
        let wallet = db.wallet().open(1, t0()).await.unwrap();
        db.wallet()
            .credit(
                Posting {
                    wallet_id: wallet.id,
                    amount: Money::from_major(100),
                    description: "top-up",
                    order_id: None,
                    reference: "TOPUP-1",
                },
                t0(),
            )
            .await
            .unwrap();

        let placed = place(&db, &books, PaymentMethod::Wallet).await;

        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::from_major(20));
        let payment = db
            .wallet()
            .by_reference(&payment_reference(placed.order_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.tx_type, TransactionType::Debit);
        assert!(db.wallet().verify(wallet.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cod_cancel_restocks_without_credit() {
        let (db, books) = db_with_books(&[500]).await;
        let placed = place(&db, &books, PaymentMethod::Cod).await;
        assert_eq!(placed.breakdown.final_total, "500.00");
        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 9);

        let outcome = db
            .order_service()
            .cancel_order(USER, placed.order_id, Some("changed my mind"), t0() + Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(outcome.status, OrderStatus::Cancelled);
        assert_eq!(outcome.refund_status, RefundStatus::NotApplicable);
        assert_eq!(outcome.refund_amount, "0.00");
        assert_eq!(outcome.restocked_units, 1);
        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 10);
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::zero());
        assert!(db.wallet().history(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepaid_cancel_credits_exactly_once() {
        let (db, books) = db_with_books(&[500]).await;
        let placed = place(&db, &books, PaymentMethod::Online).await;
        let at = t0() + Duration::minutes(5);

        let outcome = db
            .order_service()
            .cancel_order(USER, placed.order_id, None, at)
            .await
            .unwrap();
        assert_eq!(outcome.refund_status, RefundStatus::Completed);
        assert_eq!(outcome.refund_amount, "500.00");

        let err = db
            .order_service()
            .cancel_order(USER, placed.order_id, None, at)
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_core(),
            Some(CoreError::InvalidOrderStatus {
                current_status: OrderStatus::Cancelled,
                ..
            })
        ));

        let history = db.wallet().history(1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_type, TransactionType::Credit);
        assert_eq!(history[0].amount, Money::from_major(500));
        assert_eq!(history[0].reference, "REFUND-ORDER-1-CANCEL");
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::from_major(500));
        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_cancel_guards() {
        let (db, books) = db_with_books(&[20]).await;
        let placed = place(&db, &books, PaymentMethod::Online).await;

        let err = db
            .order_service()
            .cancel_order(USER, placed.order_id, None, t0() + Duration::minutes(31))
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::CancellationWindowExpired { .. })));

        let err = db
            .order_service()
            .cancel_order(Caller::customer(2), placed.order_id, None, t0())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(db.wallet().history(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_item_unwinds_coupon_share() {
        let (db, books) = db_with_books(&[100, 300]).await;
        flat_coupon(&db, "FORTY", 40).await;
        for book in &books {
            db.cart_service().add_item(USER, book.id, 1, t0()).await.unwrap();
        }
        db.coupon_service().apply(USER, "FORTY", t0()).await.unwrap();
        let placed = db
            .order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method: PaymentMethod::Online,
                    delivery_charge: Money::zero(),
                },
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(placed.breakdown.final_total, "360.00");

        let items = db.orders().get_items(placed.order_id).await.unwrap();
        let outcome = db
            .order_service()
            .cancel_item(USER, placed.order_id, items[0].id, None, t0() + Duration::minutes(1))
            .await
            .unwrap();

        // 100 / 400 × 40 = 10 of the coupon goes with the line.
        assert_eq!(outcome.refund_amount, "90.00");
        assert_eq!(outcome.status, OrderStatus::Placed);
        assert_eq!(outcome.breakdown.coupon_discount, "30.00");
        assert_eq!(outcome.breakdown.final_total, "270.00");
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::from_major(90));

        // Last line cancels the order and refunds what is left.
        let outcome = db
            .order_service()
            .cancel_item(USER, placed.order_id, items[1].id, None, t0() + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(outcome.status, OrderStatus::Cancelled);
        assert_eq!(outcome.item_id, Some(items[1].id));
        assert_eq!(outcome.refund_amount, "270.00");
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::from_major(360));
    }

    #[tokio::test]
    async fn test_status_progression_is_admin_only_and_stepwise() {
        let (db, books) = db_with_books(&[20]).await;
        let placed = place(&db, &books, PaymentMethod::Cod).await;

        let err = db
            .order_service()
            .update_status(
                USER,
                placed.order_id,
                StatusUpdate {
                    status: OrderStatus::Processing,
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::AdminRequired)));

        let err = db
            .order_service()
            .update_status(
                ADMIN,
                placed.order_id,
                StatusUpdate {
                    status: OrderStatus::Shipped,
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        deliver(&db, placed.order_id, t0() + Duration::hours(2)).await;
        let order = db.orders().get_order(placed.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.delivered_at, Some(t0() + Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_item_return_reduces_final_total_by_refund() {
        let (db, books) = db_with_books(&[100, 200]).await;
        flat_coupon(&db, "THIRTY", 30).await;
        for book in &books {
            db.cart_service().add_item(USER, book.id, 1, t0()).await.unwrap();
        }
        db.coupon_service().apply(USER, "THIRTY", t0()).await.unwrap();
        let placed = db
            .order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method: PaymentMethod::Cod,
                    delivery_charge: Money::zero(),
                },
                t0(),
            )
            .await
            .unwrap();
        deliver(&db, placed.order_id, t0() + Duration::hours(1)).await;

        let before = db.orders().get_items(placed.order_id).await.unwrap();
        let returned = &before[0];
        let kept = before[1].clone();
        assert_eq!(returned.coupon_discount, Money::from_major(15));

        let requested = db
            .order_service()
            .return_item(USER, placed.order_id, returned.id, "torn cover", t0() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(requested.pending_refund, "85.00");
        assert_eq!(requested.status, OrderStatus::Delivered);
        // Nothing moves until review.
        assert_eq!(requested.breakdown.final_total, "270.00");
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::zero());

        let pending = db.order_service().pending_returns(ADMIN).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].item_id, returned.id);

        let reviewed = db
            .order_service()
            .review_return(
                ADMIN,
                placed.order_id,
                returned.id,
                ReviewDecision::Approve {
                    condition: ItemCondition::Good,
                },
                t0() + Duration::days(3),
            )
            .await
            .unwrap();

        assert_eq!(reviewed.refund_amount, "85.00");
        assert_eq!(reviewed.refund_status, Some(RefundStatus::Completed));
        assert!(reviewed.restocked);
        assert!(!reviewed.has_pending_returns);
        assert_eq!(reviewed.order_status, OrderStatus::Delivered);
        assert_eq!(reviewed.breakdown.final_total, "185.00");

        let after = db.orders().get_items(placed.order_id).await.unwrap();
        let still = &after[1];
        assert_eq!(still.price, kept.price);
        assert_eq!(still.coupon_discount, kept.coupon_discount);
        assert_eq!(still.total, kept.total);
        assert_eq!(still.return_status, None);

        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::from_major(85));
        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 10);

        // A second decision finds nothing pending.
        let err = db
            .order_service()
            .review_return(
                ADMIN,
                placed.order_id,
                returned.id,
                ReviewDecision::Approve {
                    condition: ItemCondition::Good,
                },
                t0() + Duration::days(3),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::NoPendingReturn { .. })));
        assert_eq!(db.wallet().history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_whole_order_return_settles_by_decisions() {
        let (db, books) = db_with_books(&[60, 40]).await;
        let placed = place(&db, &books, PaymentMethod::Online).await;
        deliver(&db, placed.order_id, t0()).await;

        let requested = db
            .order_service()
            .return_order(USER, placed.order_id, "wrong edition", t0() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(requested.status, OrderStatus::ReturnRequested);
        assert_eq!(requested.item_ids.len(), 2);
        assert_eq!(requested.pending_refund, "100.00");

        let err = db
            .order_service()
            .return_item(USER, placed.order_id, requested.item_ids[0], "again", t0() + Duration::days(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let first = db
            .order_service()
            .review_return(
                ADMIN,
                placed.order_id,
                requested.item_ids[0],
                ReviewDecision::Approve {
                    condition: ItemCondition::Damaged,
                },
                t0() + Duration::days(2),
            )
            .await
            .unwrap();
        assert!(!first.restocked);
        assert!(first.has_pending_returns);
        assert_eq!(first.order_status, OrderStatus::ReturnRequested);

        let err = db
            .order_service()
            .review_return(
                ADMIN,
                placed.order_id,
                requested.item_ids[1],
                ReviewDecision::Reject {
                    reason: "  ".to_string(),
                },
                t0() + Duration::days(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let second = db
            .order_service()
            .review_return(
                ADMIN,
                placed.order_id,
                requested.item_ids[1],
                ReviewDecision::Reject {
                    reason: "used copy".to_string(),
                },
                t0() + Duration::days(2),
            )
            .await
            .unwrap();
        assert_eq!(second.return_status, ReturnStatus::Rejected);
        assert_eq!(second.refund_amount, "0.00");
        assert!(!second.has_pending_returns);
        assert_eq!(second.order_status, OrderStatus::ReturnCompleted);
        assert_eq!(second.breakdown.final_total, "40.00");

        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::from_major(60));
        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_return_window_uses_category_override() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let short = db.catalog().insert_category("Magazines", Some(2)).await.unwrap();
        let book = db
            .catalog()
            .insert_book("Monthly", Money::from_major(10), 5, short.id)
            .await
            .unwrap();
        let placed = place(&db, &[book], PaymentMethod::Cod).await;
        deliver(&db, placed.order_id, t0()).await;

        let items = db.orders().get_items(placed.order_id).await.unwrap();
        let err = db
            .order_service()
            .return_item(USER, placed.order_id, items[0].id, "late", t0() + Duration::days(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_core(),
            Some(CoreError::ReturnWindowExpired { window_days: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_order_hides_other_users() {
        let (db, books) = db_with_books(&[25]).await;
        let placed = place(&db, &books, PaymentMethod::Cod).await;

        let view = db.order_service().get_order(USER, placed.order_id).await.unwrap();
        assert_eq!(view.breakdown.final_total, "25.00");
        assert_eq!(view.items.len(), 1);

        assert!(db.order_service().get_order(ADMIN, placed.order_id).await.is_ok());
        let err = db
            .order_service()
            .get_order(Caller::customer(2), placed.order_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_lopsided_coupon_refunds_sum_to_amount_paid() {
        let (db, books) = db_with_books(&[10, 500]).await;
        flat_coupon(&db, "HUNDRED", 100).await;
        for book in &books {
            db.cart_service().add_item(USER, book.id, 1, t0()).await.unwrap();
        }
        db.coupon_service().apply(USER, "HUNDRED", t0()).await.unwrap();
        let placed = db
            .order_service()
            .checkout(
                USER,
                CheckoutRequest {
                    payment_method: PaymentMethod::Online,
                    delivery_charge: Money::zero(),
                },
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(placed.breakdown.final_total, "410.00");
        deliver(&db, placed.order_id, t0() + Duration::hours(1)).await;

        let items = db.orders().get_items(placed.order_id).await.unwrap();
        assert_eq!(items[0].coupon_discount, Money::from_major(10));
        assert_eq!(items[1].coupon_discount, Money::from_major(90));

        let mut refunded = Money::zero();
        let mut expected_totals = ["410.00", "0.00"].into_iter();
        for item in &items {
            db.order_service()
                .return_item(USER, placed.order_id, item.id, "changed mind", t0() + Duration::days(1))
                .await
                .unwrap();
            let reviewed = db
                .order_service()
                .review_return(
                    ADMIN,
                    placed.order_id,
                    item.id,
                    ReviewDecision::Approve {
                        condition: ItemCondition::Good,
                    },
                    t0() + Duration::days(2),
                )
                .await
                .unwrap();
            assert_eq!(Some(reviewed.breakdown.final_total.as_str()), expected_totals.next());
            refunded += m(&reviewed.refund_amount);
        }

        assert_eq!(refunded, m("410"));
        assert_eq!(db.wallet().balance(1).await.unwrap(), m("410"));
    }

    async fn take_ledger_offline(db: &Database) {
        sqlx::query(
            "CREATE TRIGGER ledger_offline BEFORE INSERT ON wallet_transactions \
             BEGIN SELECT RAISE(ABORT, 'ledger offline'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_rolls_back_restock_when_refund_fails() {
        let (db, books) = db_with_books(&[500]).await;
        let placed = place(&db, &books, PaymentMethod::Online).await;
        take_ledger_offline(&db).await;

        let err = db
            .order_service()
            .cancel_order(USER, placed.order_id, None, t0() + Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(err.as_core().is_none());
        assert_eq!(err.kind(), ErrorKind::TransientInfra);

        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 9);
        let order = db.orders().get_order(placed.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.refund_amount, Money::zero());
        let items = db.orders().get_items(placed.order_id).await.unwrap();
        assert!(items.iter().all(OrderItem::is_live));
        assert!(db.wallet().history(1).await.unwrap().is_empty());
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::zero());
    }

    #[tokio::test]
    async fn test_review_rolls_back_restock_when_refund_fails() {
        let (db, books) = db_with_books(&[60, 40]).await;
        let placed = place(&db, &books, PaymentMethod::Online).await;
        deliver(&db, placed.order_id, t0()).await;
        let items = db.orders().get_items(placed.order_id).await.unwrap();
        db.order_service()
            .return_item(USER, placed.order_id, items[0].id, "damaged", t0() + Duration::days(1))
            .await
            .unwrap();
        take_ledger_offline(&db).await;

        let err = db
            .order_service()
            .review_return(
                ADMIN,
                placed.order_id,
                items[0].id,
                ReviewDecision::Approve {
                    condition: ItemCondition::Good,
                },
                t0() + Duration::days(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientInfra);

        assert_eq!(db.catalog().stock_of(books[0].id).await.unwrap(), 9);
        let order = db.orders().get_order(placed.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.final_total, Money::from_major(100));
        assert!(order.has_pending_returns);
        let after = db.orders().get_items(placed.order_id).await.unwrap();
        assert_eq!(after[0].return_status, Some(ReturnStatus::Pending));
        assert!(db.wallet().history(1).await.unwrap().is_empty());
        assert_eq!(db.wallet().balance(1).await.unwrap(), Money::zero());
    }
}
