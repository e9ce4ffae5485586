use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use validator::Validate;

use crate::basket::{self, BasketService};
use crate::catalog::{CatalogRepository, ContentKind};
use crate::coupons::{CouponEngine, CouponFilters, CouponsRepository};
use crate::fulfillment::{CrmSink, EnrollmentCodeIssuer, EnrollmentSink};
use crate::gateway::{CyberSourceGateway, PayloadLine};
use crate::orders::{
    parse_reference_number, reference_number, CheckoutResponse, CreateBulkOrderRequest, Order,
    OrderError, OrderKind, OrderStatus, OrdersRepository, PriceCalculator, StatusMachine,
};

/// Orchestrates checkout and gateway-callback fulfillment.
#[derive(Clone)]
pub struct OrderService {
    orders_repo: OrdersRepository,
    basket_service: BasketService,
    catalog_repo: CatalogRepository,
    coupons_repo: CouponsRepository,
    coupon_engine: CouponEngine,
    gateway: CyberSourceGateway,
    enrollment_sink: Arc<dyn EnrollmentSink>,
    crm_sink: Arc<dyn CrmSink>,
    code_issuer: Arc<dyn EnrollmentCodeIssuer>,
    environment: String,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders_repo: OrdersRepository,
        basket_service: BasketService,
        catalog_repo: CatalogRepository,
        coupons_repo: CouponsRepository,
        coupon_engine: CouponEngine,
        gateway: CyberSourceGateway,
        enrollment_sink: Arc<dyn EnrollmentSink>,
        crm_sink: Arc<dyn CrmSink>,
        code_issuer: Arc<dyn EnrollmentCodeIssuer>,
        environment: String,
    ) -> Self {
        Self {
            orders_repo,
            basket_service,
            catalog_repo,
            coupons_repo,
            coupon_engine,
            gateway,
            enrollment_sink,
            crm_sink,
            code_issuer,
            environment,
        }
    }

    /// Checkout: validate the basket, compute the final price, and create
    /// the order. Returns either a signed gateway payload to POST, or a
    /// receipt-page redirect for zero-price orders (which fulfill
    /// synchronously without touching the gateway).
    pub async fn create_order(&self, user_id: i32) -> Result<CheckoutResponse, OrderError> {
        let validated = self
            .basket_service
            .validate_basket_for_checkout(user_id)
            .await?;
        tracing::debug!(
            "Basket {} validated for user {}: {} run(s), {} signed consent(s)",
            validated.basket.id,
            user_id,
            validated.run_ids.len(),
            validated.signed_consents.len()
        );

        // No coupon in the basket: fall back to the best coupon flagged
        // for automatic application, if one applies to this product
        let coupon_version = match validated.coupon_version.clone() {
            Some(version) => Some(version),
            None => {
                let filters = CouponFilters {
                    auto_only: true,
                    ..Default::default()
                };
                self.coupon_engine
                    .best_coupon_for_product(validated.product.id, user_id, &filters)
                    .await?
            }
        };

        // Coupons from the engine are already scoped to this product, so
        // an applied coupon always discounts here
        let total = PriceCalculator::price_with_discount(
            &validated.product_version,
            coupon_version.as_ref(),
            true,
        );

        let (order, _line) = self
            .orders_repo
            .create_order(
                user_id,
                OrderKind::Standard,
                total,
                validated.product_version.id,
                validated.item.quantity,
                coupon_version.as_ref().map(|v| v.version_id),
                Some(user_id),
            )
            .await?;

        tracing::info!(
            "Created order {} for user {} with total {}",
            order.id,
            user_id,
            total
        );

        if total == Decimal::ZERO {
            return self.fulfill_zero_price_order(order, user_id).await;
        }

        let line = PayloadLine {
            code: validated.product.content_kind.as_str().to_string(),
            name: validated.product_version.description.clone(),
            sku: validated.product_version.text_id.clone(),
            unit_price: validated.product_version.price,
            quantity: 1,
        };
        let reference = order.reference_number(&self.environment);
        let payload = self.gateway.build_payload(&order, &reference, &[line]);

        Ok(CheckoutResponse {
            order_id: order.id,
            url: self.gateway.payment_url().to_string(),
            method: "POST",
            payload: Some(payload),
        })
    }

    /// B2B seat purchase: same pricing and fulfillment core, but the order
    /// buys N seats and fulfillment issues N enrollment codes instead of
    /// enrolling the purchaser.
    pub async fn create_bulk_order(
        &self,
        user_id: i32,
        request: CreateBulkOrderRequest,
    ) -> Result<CheckoutResponse, OrderError> {
        request
            .validate()
            .map_err(|e| OrderError::ValidationError(e.to_string()))?;

        let product = self
            .catalog_repo
            .find_product(request.product_id)
            .await?
            .ok_or_else(|| {
                OrderError::ValidationError(format!("Product {} not found", request.product_id))
            })?;
        if !product.is_active {
            return Err(OrderError::ValidationError(format!(
                "Product {} is not available",
                product.id
            )));
        }
        let version = self
            .catalog_repo
            .latest_version(product.id)
            .await?
            .ok_or_else(|| {
                OrderError::ValidationError(format!("Product {} has no price", product.id))
            })?;

        let coupon_version = match &request.coupon_code {
            Some(code) => Some(
                self.coupon_engine
                    .resolve_code_for_product(code, product.id, user_id)
                    .await?,
            ),
            None => None,
        };

        let unit_price =
            PriceCalculator::price_with_discount(&version, coupon_version.as_ref(), true);
        let total = PriceCalculator::bulk_total(unit_price, request.num_seats);

        let (order, _line) = self
            .orders_repo
            .create_order(
                user_id,
                OrderKind::Bulk,
                total,
                version.id,
                request.num_seats,
                coupon_version.as_ref().map(|v| v.version_id),
                Some(user_id),
            )
            .await?;

        tracing::info!(
            "Created bulk order {} for user {} ({} seats, total {})",
            order.id,
            user_id,
            request.num_seats,
            total
        );

        if total == Decimal::ZERO {
            return self.fulfill_zero_price_order(order, user_id).await;
        }

        let line = PayloadLine {
            code: product.content_kind.as_str().to_string(),
            name: version.description.clone(),
            sku: version.text_id.clone(),
            unit_price,
            quantity: request.num_seats,
        };
        let reference = order.reference_number(&self.environment);
        let payload = self.gateway.build_payload(&order, &reference, &[line]);

        Ok(CheckoutResponse {
            order_id: order.id,
            url: self.gateway.payment_url().to_string(),
            method: "POST",
            payload: Some(payload),
        })
    }

    /// Process a verified gateway callback.
    ///
    /// The raw payload is persisted as a Receipt before anything else, so
    /// no gateway message is ever lost, even when the reference number is
    /// unresolvable or the payload is malformed.
    pub async fn fulfill_order(
        &self,
        payload: HashMap<String, String>,
    ) -> Result<(), OrderError> {
        let receipt = self.orders_repo.create_receipt(json!(payload)).await?;

        let reference = payload.get("req_reference_number").ok_or_else(|| {
            OrderError::MalformedCallback("missing req_reference_number".to_string())
        })?;

        let order_id = match parse_reference_number(reference, &self.environment) {
            Some(order_id) => order_id,
            None => {
                tracing::warn!(
                    "Gateway callback with unparseable reference number {:?}; receipt {} kept orphaned",
                    reference,
                    receipt.id
                );
                return Ok(());
            }
        };

        let order = match self.orders_repo.find(order_id).await? {
            Some(order) => order,
            None => {
                tracing::warn!(
                    "Gateway callback for unknown order {}; receipt {} kept orphaned",
                    order_id,
                    receipt.id
                );
                return Ok(());
            }
        };
        self.orders_repo.attach_receipt(receipt.id, order.id).await?;

        let decision = payload
            .get("decision")
            .ok_or_else(|| OrderError::MalformedCallback("missing decision".to_string()))?;

        let new_status = match StatusMachine::determine_status_change(&order, decision)? {
            Some(new_status) => new_status,
            None => {
                tracing::info!(
                    "Duplicate CANCEL for already-failed order {}; ignoring",
                    order.id
                );
                return Ok(());
            }
        };

        if new_status == OrderStatus::Fulfilled {
            self.run_fulfillment(&order).await?;
        }

        // The audited save happens whether the order fulfilled or failed
        let saved = self
            .orders_repo
            .save_status_audited(order.id, new_status, None)
            .await?;
        tracing::info!("Order {} moved to {}", saved.id, saved.status);

        if new_status == OrderStatus::Fulfilled {
            self.after_fulfillment(&saved).await?;
        }

        Ok(())
    }

    /// Zero-price checkout: skip the gateway, fulfill synchronously, and
    /// send the user straight to the receipt page.
    async fn fulfill_zero_price_order(
        &self,
        order: Order,
        user_id: i32,
    ) -> Result<CheckoutResponse, OrderError> {
        self.run_fulfillment(&order).await?;
        let saved = self
            .orders_repo
            .save_status_audited(order.id, OrderStatus::Fulfilled, Some(user_id))
            .await?;
        self.after_fulfillment(&saved).await?;

        tracing::info!("Zero-price order {} fulfilled synchronously", saved.id);

        Ok(CheckoutResponse {
            order_id: saved.id,
            url: self.gateway.receipt_url().to_string(),
            method: "GET",
            payload: None,
        })
    }

    /// Create enrollments (standard orders) or enrollment codes (bulk).
    /// Partial enrollment failure is logged with full order context but
    /// never reverts the order; repair happens out of band.
    async fn run_fulfillment(&self, order: &Order) -> Result<(), OrderError> {
        match order.kind {
            OrderKind::Standard => {
                let run_ids = self.runs_for_order(order).await?;
                let (successful, all_ok) = self
                    .enrollment_sink
                    .create_run_enrollments(order.purchaser_id, &run_ids, order.id, true)
                    .await;
                if !all_ok {
                    tracing::error!(
                        "Partial enrollment failure for order {}: {} of {} runs enrolled",
                        order.id,
                        successful.len(),
                        run_ids.len()
                    );
                }
            }
            OrderKind::Bulk => {
                let line = self
                    .orders_repo
                    .line_for_order(order.id)
                    .await?
                    .ok_or(OrderError::OrderNotFound(order.id))?;
                let version = self
                    .catalog_repo
                    .find_version(line.product_version_id)
                    .await?
                    .ok_or(OrderError::OrderNotFound(order.id))?;
                self.code_issuer
                    .issue_codes(order, version.product_id, line.quantity)
                    .await?;
            }
        }

        Ok(())
    }

    /// Post-fulfillment bookkeeping: mark sponsored coupon assignments
    /// redeemed, clear the basket atomically, and notify the CRM without
    /// letting its failure touch the order.
    async fn after_fulfillment(&self, order: &Order) -> Result<(), OrderError> {
        if let Some((coupon_id, _code)) = self.orders_repo.redeemed_coupon(order.id).await? {
            if let Some(email) = self.purchaser_email(order.purchaser_id).await? {
                let marked = self
                    .coupons_repo
                    .mark_assignments_redeemed(coupon_id, &email)
                    .await?;
                if marked > 0 {
                    tracing::info!(
                        "Marked {} coupon assignment(s) redeemed for order {}",
                        marked,
                        order.id
                    );
                }
            }
        }

        if let Some(user_basket) = self.basket_of(order.purchaser_id).await? {
            let mut tx = self.orders_repo.pool().begin().await?;
            basket::clear_contents(&mut *tx, user_basket).await?;
            tx.commit().await?;
        }

        let crm = Arc::clone(&self.crm_sink);
        let order = order.clone();
        tokio::spawn(async move {
            crm.sync_deal(&order).await;
        });

        Ok(())
    }

    async fn runs_for_order(&self, order: &Order) -> Result<Vec<i64>, OrderError> {
        let line = self
            .orders_repo
            .line_for_order(order.id)
            .await?
            .ok_or(OrderError::OrderNotFound(order.id))?;
        let version = self
            .catalog_repo
            .find_version(line.product_version_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order.id))?;
        let product = self
            .catalog_repo
            .find_product(version.product_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order.id))?;

        match product.content_kind {
            ContentKind::CourseRun => Ok(vec![product.content_id]),
            ContentKind::Program => {
                // Program run selections live in the purchaser's basket,
                // which is not cleared until fulfillment completes
                match self.basket_of(order.purchaser_id).await? {
                    Some(basket_id) => {
                        let selections: Vec<i64> = sqlx::query_scalar(
                            "SELECT run_id FROM course_run_selections WHERE basket_id = $1",
                        )
                        .bind(basket_id)
                        .fetch_all(self.orders_repo.pool())
                        .await?;
                        Ok(selections)
                    }
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    async fn basket_of(&self, user_id: i32) -> Result<Option<i64>, OrderError> {
        let basket_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM baskets WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(self.orders_repo.pool())
                .await?;
        Ok(basket_id)
    }

    async fn purchaser_email(&self, user_id: i32) -> Result<Option<String>, OrderError> {
        let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.orders_repo.pool())
            .await?;
        Ok(email)
    }

    /// Order history for a user, newest first
    pub async fn order_history(&self, user_id: i32) -> Result<Vec<Order>, OrderError> {
        self.orders_repo.orders_for_user(user_id).await
    }

    /// Reference number for an order, for receipts and support tooling
    pub fn order_reference(&self, order_id: i64) -> String {
        reference_number(&self.environment, order_id)
    }
}
