use std::collections::HashMap;

use chrono::Utc;

use crate::basket::error::BasketError;
use crate::basket::models::{
    BasketResponse, UpdateBasketRequest, ValidatedBasket,
};
use crate::basket::repository::BasketRepository;
use crate::catalog::{ContentKind, Course, CourseRun, CatalogRepository};
use crate::coupons::{CouponEngine, CouponFilters, CouponsRepository, CurrentCouponVersion};

/// Validates baskets for checkout and services the basket HTTP surface.
#[derive(Clone)]
pub struct BasketService {
    baskets: BasketRepository,
    catalog: CatalogRepository,
    coupons: CouponsRepository,
    engine: CouponEngine,
}

/// Check that a program's run selections are complete: exactly one run per
/// constituent course, and no run from outside the program.
fn validate_program_selection(
    courses: &[Course],
    selected_runs: &[CourseRun],
) -> Result<(), BasketError> {
    let course_ids: Vec<i64> = courses.iter().map(|c| c.id).collect();

    let mut per_course: HashMap<i64, usize> = HashMap::new();
    for run in selected_runs {
        if !course_ids.contains(&run.course_id) {
            return Err(BasketError::ExtraRunSelection(run.id));
        }
        *per_course.entry(run.course_id).or_insert(0) += 1;
    }

    for course in courses {
        match per_course.get(&course.id).copied().unwrap_or(0) {
            0 => return Err(BasketError::MissingRunSelection(course.title.clone())),
            1 => {}
            _ => return Err(BasketError::DuplicateRunSelection(course.title.clone())),
        }
    }

    Ok(())
}

impl BasketService {
    pub fn new(
        baskets: BasketRepository,
        catalog: CatalogRepository,
        coupons: CouponsRepository,
        engine: CouponEngine,
    ) -> Self {
        Self {
            baskets,
            catalog,
            coupons,
            engine,
        }
    }

    /// Validate the user's basket for checkout.
    ///
    /// Every failure mode maps to a distinct BasketError variant keyed to
    /// the basket section it belongs to. The coupon is re-validated here
    /// even if it passed validation when it was applied to the basket.
    pub async fn validate_basket_for_checkout(
        &self,
        user_id: i32,
    ) -> Result<ValidatedBasket, BasketError> {
        let now = Utc::now();

        let basket = self
            .baskets
            .find_by_user(user_id)
            .await?
            .ok_or(BasketError::EmptyBasket)?;

        let mut items = self.baskets.items(basket.id).await?;
        let item = match items.len() {
            0 => return Err(BasketError::EmptyBasket),
            1 => items.remove(0),
            _ => return Err(BasketError::MultipleItems),
        };

        let product = self
            .catalog
            .find_product(item.product_id)
            .await?
            .ok_or(BasketError::UnavailableProduct(item.product_id))?;
        if !product.is_active || !self.catalog.is_content_live(&product).await? {
            return Err(BasketError::UnavailableProduct(product.id));
        }

        let product_version = self
            .catalog
            .latest_version(product.id)
            .await?
            .ok_or(BasketError::UnavailableProduct(product.id))?;

        let runs = self.resolve_runs(&product, basket.id).await?;
        for run in &runs {
            if !run.is_unexpired(now) {
                return Err(BasketError::ExpiredRun(run.id));
            }
        }

        let run_ids: Vec<i64> = runs.iter().map(|r| r.id).collect();
        let enrolled = self.catalog.enrolled_run_ids(user_id, &run_ids).await?;
        if let Some(run_id) = enrolled.first() {
            return Err(BasketError::AlreadyEnrolled(*run_id));
        }

        let coupon_version = self.resolve_coupon(basket.id, product.id, user_id).await?;

        let mut signed_consents = Vec::new();
        if let Some(version) = &coupon_version {
            if let Some(company_id) = version.company_id {
                let consents = self.baskets.consents(user_id, company_id).await?;
                if consents.is_empty() || consents.iter().any(|c| c.consent_date.is_none()) {
                    return Err(BasketError::UnsignedDataConsent);
                }
                signed_consents = consents;
            }
        }

        Ok(ValidatedBasket {
            basket,
            item,
            product,
            product_version,
            coupon_version,
            run_ids,
            signed_consents,
        })
    }

    /// The course runs the order will enroll. For a course-run product this
    /// is the run itself; for a program it is the user's selections, which
    /// must cover each constituent course exactly once.
    async fn resolve_runs(
        &self,
        product: &crate::catalog::Product,
        basket_id: i64,
    ) -> Result<Vec<CourseRun>, BasketError> {
        match product.content_kind {
            ContentKind::CourseRun => {
                let run = self
                    .catalog
                    .find_run(product.content_id)
                    .await?
                    .ok_or(BasketError::UnavailableProduct(product.id))?;
                Ok(vec![run])
            }
            ContentKind::Program => {
                let courses = self.catalog.program_courses(product.content_id).await?;
                let selections = self.baskets.run_selections(basket_id).await?;
                let selected_ids: Vec<i64> = selections.iter().map(|s| s.run_id).collect();
                let runs = self.catalog.runs_by_ids(&selected_ids).await?;

                validate_program_selection(&courses, &runs)?;
                Ok(runs)
            }
        }
    }

    /// Re-resolve the basket's coupon selection against the product. A
    /// selection that no longer applies (disabled, expired, limits reached,
    /// not eligible for this product) is rejected, not silently dropped.
    async fn resolve_coupon(
        &self,
        basket_id: i64,
        product_id: i64,
        user_id: i32,
    ) -> Result<Option<CurrentCouponVersion>, BasketError> {
        let selection = match self.baskets.coupon_selection(basket_id).await? {
            Some(selection) => selection,
            None => return Ok(None),
        };

        let coupon = self
            .coupons
            .find_by_id(selection.coupon_id)
            .await?
            .ok_or_else(|| BasketError::IneligibleCoupon("unknown".to_string()))?;

        let filters = CouponFilters {
            code: Some(coupon.coupon_code.clone()),
            ..Default::default()
        };
        let versions = self
            .engine
            .get_valid_coupon_versions(product_id, user_id, &filters)
            .await?;

        versions
            .into_iter()
            .find(|v| v.coupon_id == coupon.id)
            .map(Some)
            .ok_or(BasketError::IneligibleCoupon(coupon.coupon_code))
    }

    /// The user's basket with its contents, for GET /api/basket
    pub async fn get_basket(&self, user_id: i32) -> Result<BasketResponse, BasketError> {
        let basket = self.baskets.get_or_create(user_id).await?;
        let items = self.baskets.items(basket.id).await?;
        let run_selections = self.baskets.run_selections(basket.id).await?;

        let coupon_code = match self.baskets.coupon_selection(basket.id).await? {
            Some(selection) => self
                .coupons
                .find_by_id(selection.coupon_id)
                .await?
                .map(|c| c.coupon_code),
            None => None,
        };

        Ok(BasketResponse {
            basket,
            item: items.into_iter().next(),
            run_selections,
            coupon_code,
        })
    }

    /// Apply a PATCH /api/basket request. The coupon code is validated
    /// against the basket's product here for early feedback, and validated
    /// again at checkout.
    pub async fn update_basket(
        &self,
        user_id: i32,
        request: UpdateBasketRequest,
    ) -> Result<BasketResponse, BasketError> {
        let basket = self.baskets.get_or_create(user_id).await?;

        if let Some(product_id) = request.product_id {
            let product = self
                .catalog
                .find_product(product_id)
                .await?
                .ok_or(BasketError::UnavailableProduct(product_id))?;
            if !product.is_active {
                return Err(BasketError::UnavailableProduct(product_id));
            }
            self.baskets.replace_item(basket.id, product_id).await?;
        }

        if let Some(run_ids) = &request.run_ids {
            self.baskets
                .replace_run_selections(basket.id, run_ids)
                .await?;
        }

        match request.coupon_code {
            Some(Some(code)) => {
                let items = self.baskets.items(basket.id).await?;
                let item = items.first().ok_or(BasketError::EmptyBasket)?;
                let version = self
                    .engine
                    .resolve_code_for_product(&code, item.product_id, user_id)
                    .await?;
                self.baskets.set_coupon(basket.id, version.coupon_id).await?;
            }
            Some(None) => {
                self.baskets.clear_coupon(basket.id).await?;
            }
            None => {}
        }

        self.get_basket(user_id).await
    }
}
