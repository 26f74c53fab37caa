//! # Cart Service
//!
//! Cart mutations and the priced cart view. Pricing a cart is shared with
//! the coupon and checkout services through [`price_cart`] and
//! [`evaluate_active_coupon`].

use chrono::{DateTime, Utc};
use folio_core::coupon::{self as coupon_rules, CouponQuote};
use folio_core::offer::resolve;
use folio_core::outcome::{CartLineView, CartView};
use folio_core::pricing::{price_lines, CartPricing, PricingInput};
use folio_core::validation::validate_quantity;
use folio_core::{
    Book, Caller, CartItem, CoreError, CoreResult, UserActiveCoupon, ValidationError,
    MAX_CART_ITEMS, MAX_ITEM_QUANTITY,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::{DbError, ServiceResult};
use crate::repository::{cart, catalog, coupon, offer};

// =============================================================================
// Shared pricing
// =============================================================================

/// A cart with its books and unrounded pricing, lines in cart order.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub items: Vec<CartItem>,
    pub books: Vec<Book>,
    pub pricing: CartPricing,
}

/// Loads the user's cart and prices it under the offers effective at `now`.
pub async fn price_cart(
    conn: &mut SqliteConnection,
    user_id: i64,
    now: DateTime<Utc>,
) -> ServiceResult<PricedCart> {
    let items = cart::fetch_cart(conn, user_id).await?;

    let mut books = Vec::with_capacity(items.len());
    let mut inputs = Vec::with_capacity(items.len());

    for item in &items {
        let book = catalog::fetch_book(conn, item.book_id)
            .await?
            .ok_or(CoreError::BookNotFound {
                book_id: item.book_id,
            })?;

        let candidates = offer::offers_for(conn, book.id, book.category_id).await?;
        let offers = resolve(&candidates, book.id, book.category_id, now);

        inputs.push(PricingInput::for_book(&book, item.quantity, offers));
        books.push(book);
    }

    Ok(PricedCart {
        items,
        books,
        pricing: price_lines(&inputs),
    })
}

/// Re-checks the user's applied coupon against the current cart.
///
/// The outer `Result` carries infrastructure failures; the inner one says
/// whether the coupon still qualifies.
pub async fn evaluate_active_coupon(
    conn: &mut SqliteConnection,
    active: &UserActiveCoupon,
    pricing: &CartPricing,
    now: DateTime<Utc>,
) -> ServiceResult<CoreResult<CouponQuote>> {
    let Some(found) = coupon::fetch_by_id(conn, active.coupon_id).await? else {
        return Ok(Err(CoreError::CouponNotFound {
            code: active.code.clone(),
        }));
    };

    let already_used = coupon::has_redeemed(conn, active.user_id, found.id).await?;
    Ok(coupon_rules::quote(&found, already_used, pricing, now))
}

/// Builds the cart view inside the caller's transaction.
pub(crate) async fn build_view(
    conn: &mut SqliteConnection,
    user_id: i64,
    now: DateTime<Utc>,
) -> ServiceResult<CartView> {
    let priced = price_cart(conn, user_id, now).await?;

    let mut applied_coupon = None;
    let mut coupon_notice = None;
    let mut quote = None;

    if let Some(active) = coupon::fetch_active(conn, user_id).await? {
        match evaluate_active_coupon(conn, &active, &priced.pricing, now).await? {
            Ok(q) => quote = Some(q),
            Err(reason) => coupon_notice = Some(reason.to_string()),
        }
        applied_coupon = Some(active.code);
    }

    let (discount, per_unit) = quote
        .as_ref()
        .map(|q| (q.discount, q.per_unit))
        .unwrap_or_default();

    let lines = priced
        .pricing
        .lines
        .iter()
        .zip(&priced.books)
        .map(|(line, book)| CartLineView::new(line, &book.title, per_unit * line.quantity))
        .collect();

    Ok(CartView {
        lines,
        applied_coupon,
        coupon_notice,
        discount_per_unit: per_unit.to_fixed(),
        can_checkout: priced.pricing.can_checkout(),
        breakdown: priced.pricing.breakdown(discount),
    })
}

// =============================================================================
// Service
// =============================================================================

/// Cart operations.
#[derive(Debug, Clone)]
pub struct CartService {
    pool: SqlitePool,
}

impl CartService {
    pub fn new(pool: SqlitePool) -> Self {
        CartService { pool }
    }

    /// Adds `quantity` of a book, merging with an existing line.
    ///
    /// The merged quantity is capped at `MAX_ITEM_QUANTITY` and must be in
    /// stock on an active, unblocked book.
    pub async fn add_item(
        &self,
        caller: Caller,
        book_id: i64,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<CartView> {
        validate_quantity(quantity)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let book = catalog::fetch_book(&mut tx, book_id)
            .await?
            .ok_or(CoreError::BookNotFound { book_id })?;

        let existing = cart::fetch_line(&mut tx, caller.user_id, book_id).await?;
        let combined = existing.as_ref().map_or(0, |l| l.quantity) + quantity;

        if combined > MAX_ITEM_QUANTITY {
            warn!(user_id = caller.user_id, book_id, combined, "Cart quantity over limit");
            return Err(CoreError::QuantityTooLarge {
                requested: combined,
                max: MAX_ITEM_QUANTITY,
            }
            .into());
        }

        if existing.is_none() {
            let lines = cart::fetch_cart(&mut tx, caller.user_id).await?;
            if lines.len() >= MAX_CART_ITEMS {
                return Err(ValidationError::OutOfRange {
                    field: "cart_items".to_string(),
                    min: 1,
                    max: MAX_CART_ITEMS as i64,
                }
                .into());
            }
        }

        ensure_available(&book, combined)?;

        cart::upsert_line(&mut tx, caller.user_id, book_id, combined, now).await?;
        let view = build_view(&mut tx, caller.user_id, now).await?;

        tx.commit().await.map_err(DbError::transaction)?;

        info!(user_id = caller.user_id, book_id, quantity = combined, "Cart line added");
        Ok(view)
    }

    /// Sets the quantity of a line already in the cart.
    pub async fn update_quantity(
        &self,
        caller: Caller,
        book_id: i64,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<CartView> {
        validate_quantity(quantity)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        if cart::fetch_line(&mut tx, caller.user_id, book_id).await?.is_none() {
            return Err(CoreError::CartItemNotFound { book_id }.into());
        }

        let book = catalog::fetch_book(&mut tx, book_id)
            .await?
            .ok_or(CoreError::BookNotFound { book_id })?;
        ensure_available(&book, quantity)?;

        cart::upsert_line(&mut tx, caller.user_id, book_id, quantity, now).await?;
        let view = build_view(&mut tx, caller.user_id, now).await?;

        tx.commit().await.map_err(DbError::transaction)?;

        info!(user_id = caller.user_id, book_id, quantity, "Cart line updated");
        Ok(view)
    }

    pub async fn remove_item(&self, caller: Caller, book_id: i64, now: DateTime<Utc>) -> ServiceResult<CartView> {
        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        if !cart::delete_line(&mut tx, caller.user_id, book_id).await? {
            return Err(CoreError::CartItemNotFound { book_id }.into());
        }
        let view = build_view(&mut tx, caller.user_id, now).await?;

        tx.commit().await.map_err(DbError::transaction)?;

        info!(user_id = caller.user_id, book_id, "Cart line removed");
        Ok(view)
    }

    /// The priced cart. An applied coupon that no longer qualifies stays
    /// applied but contributes nothing; `coupon_notice` says why.
    pub async fn view_cart(&self, caller: Caller, now: DateTime<Utc>) -> ServiceResult<CartView> {
        let mut conn = self.pool.acquire().await?;
        build_view(&mut conn, caller.user_id, now).await
    }
}

fn ensure_available(book: &Book, quantity: i64) -> Result<(), CoreError> {
    if !book.is_active || book.blocked {
        return Err(CoreError::BookUnavailable { book_id: book.id });
    }
    if book.stock < quantity {
        return Err(CoreError::InsufficientStock {
            book_id: book.id,
            available: book.stock,
            requested: quantity,
        });
    }
    Ok(())
}
