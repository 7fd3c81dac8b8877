pub mod provider;
pub mod webhook;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    config::{Config, PaymentConfig},
    course::{self, Course, CourseDetail, CourseSummary},
    error::{Error, Result},
    progress::{self, ProgressSummary},
    utils::now_utc,
};

use provider::{CheckoutRequest, PaymentProvider};
use webhook::{
    ASYNC_PAYMENT_FAILED, ASYNC_PAYMENT_SUCCEEDED, CHECKOUT_COMPLETED, CHECKOUT_EXPIRED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub amount: i64,
    pub status: PurchaseStatus,
    pub payment_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchasedCourse {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub course: CourseSummary,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub url: String,
}

/// One row of "my learning": a purchased or still-pending course.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LearningEntry {
    pub course: CourseSummary,
    pub status: PurchaseStatus,
    pub is_pending: bool,
    /// Absent while the purchase is pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseWithStatus {
    pub course: CourseDetail,
    pub purchased: bool,
    pub pending: bool,
    pub can_access: bool,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseSales {
    pub course_id: i64,
    pub course_title: String,
    pub sales_count: i64,
    pub revenue: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub total_sales: i64,
    pub total_revenue: i64,
    pub sales: Vec<CourseSales>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Completed(i64),
    Cancelled(String),
    Ignored,
}

/// Strongest status recorded for the pair, a completed purchase wins over a pending one.
pub async fn purchase_status(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
) -> Result<Option<PurchaseStatus>> {
    let status = sqlx::query_scalar::<_, PurchaseStatus>(
        "SELECT status FROM purchase WHERE user_id = ? AND course_id = ?
         ORDER BY status = 'completed' DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(database)
    .await?;
    Ok(status)
}

/// Creator, buyer, or anyone for a free course.
pub async fn access_check(database: &SqlitePool, user_id: i64, course: &Course) -> Result<bool> {
    if course.creator_id == user_id || course.is_free() {
        return Ok(true);
    }
    Ok(purchase_status(database, user_id, course.id).await? == Some(PurchaseStatus::Completed))
}

/// Load the course, failing with 403 when `user_id` may not study it.
pub async fn ensure_access(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<Course> {
    let course = course::get_course(database, course_id).await?;
    if !access_check(database, user_id, &course).await? {
        return Err(Error::Forbidden(
            "Purchase this course to access its content".to_string(),
        ));
    }
    Ok(course)
}

pub async fn create_checkout(
    database: &SqlitePool,
    payments: &dyn PaymentProvider,
    config: &Config,
    user_id: i64,
    course_id: i64,
) -> Result<CheckoutResponse> {
    let course = course::get_course(database, course_id).await?;
    if course.creator_id == user_id {
        return Err(Error::BadRequest(
            "You cannot purchase your own course".to_string(),
        ));
    }
    if !course.is_published {
        return Err(Error::not_found("Course"));
    }
    let Some(amount) = course.price.filter(|p| *p > 0) else {
        return Err(Error::BadRequest(
            "This course is free and needs no purchase".to_string(),
        ));
    };
    if purchase_status(database, user_id, course_id).await? == Some(PurchaseStatus::Completed) {
        return Err(Error::BadRequest("Course already purchased".to_string()));
    }
    let client_url = config.client_url.trim_end_matches('/');
    let request = CheckoutRequest {
        user_id,
        course_id,
        course_title: course.title.clone(),
        thumbnail: course.thumbnail.clone(),
        amount,
        currency: config.payment.currency.clone(),
        success_url: format!("{client_url}/courses-progress/{course_id}"),
        cancel_url: format!("{client_url}/courses-detail/{course_id}"),
    };
    let session = payments.create_checkout_session(&request).await?;
    let now = now_utc();
    sqlx::query(
        "INSERT INTO purchase (user_id, course_id, amount, status, payment_id, created_at, updated_at)
         VALUES (?, ?, ?, 'pending', ?, ?, ?)",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(amount)
    .bind(&session.id)
    .bind(now)
    .bind(now)
    .execute(database)
    .await?;
    info!(
        "pending purchase for user {} course {} at session {}",
        user_id, course_id, session.id
    );
    Ok(CheckoutResponse {
        success: true,
        url: session.url,
    })
}

/// Mark the purchase behind `payment_id` completed and enroll its buyer.
pub async fn complete_purchase(database: &SqlitePool, payment_id: &str) -> Result<Option<Purchase>> {
    let now = now_utc();
    let purchase = sqlx::query_as::<_, Purchase>(
        "UPDATE purchase SET status = 'completed', updated_at = ? WHERE payment_id = ? RETURNING *",
    )
    .bind(now)
    .bind(payment_id)
    .fetch_optional(database)
    .await?;
    let Some(purchase) = purchase else {
        return Ok(None);
    };
    // sessions opened earlier for the same course can no longer be needed
    sqlx::query("DELETE FROM purchase WHERE user_id = ? AND course_id = ? AND status = 'pending'")
        .bind(purchase.user_id)
        .bind(purchase.course_id)
        .execute(database)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO enrollment (user_id, course_id, enrolled_at) VALUES (?, ?, ?)")
        .bind(purchase.user_id)
        .bind(purchase.course_id)
        .bind(now)
        .execute(database)
        .await?;
    info!(
        "purchase {} completed, user {} enrolled in course {}",
        purchase.id, purchase.user_id, purchase.course_id
    );
    Ok(Some(purchase))
}

/// Drop a pending purchase whose checkout session died. Completed ones are kept.
pub async fn cancel_pending(database: &SqlitePool, payment_id: &str) -> Result<bool> {
    let removed = sqlx::query("DELETE FROM purchase WHERE payment_id = ? AND status = 'pending'")
        .bind(payment_id)
        .execute(database)
        .await?
        .rows_affected();
    Ok(removed > 0)
}

/// Verify and apply a provider event given as the raw request body.
pub async fn handle_webhook(
    database: &SqlitePool,
    config: &PaymentConfig,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<WebhookOutcome> {
    let Some(signature) = signature else {
        warn!("webhook without signature header rejected");
        return Err(Error::InvalidSignature);
    };
    if let Err(e) = webhook::verify_signature(
        payload,
        signature,
        &config.webhook_secret,
        config.webhook_tolerance_secs,
        now_utc().unix_timestamp(),
    ) {
        warn!("webhook rejected: {}", e);
        return Err(e);
    }
    let event = webhook::parse_event(payload)?;
    let session = event.data.object;
    let Some(session_id) = session.id.clone() else {
        info!("event {} ({}) carries no object id, ignored", event.id, event.kind);
        return Ok(WebhookOutcome::Ignored);
    };
    let outcome = match event.kind.as_str() {
        CHECKOUT_COMPLETED | ASYNC_PAYMENT_SUCCEEDED => {
            if event.kind == CHECKOUT_COMPLETED && !session.is_paid() {
                info!("session {} completed but not paid yet", session_id);
                return Ok(WebhookOutcome::Ignored);
            }
            match complete_purchase(database, &session_id).await? {
                Some(purchase) => WebhookOutcome::Completed(purchase.id),
                None => {
                    warn!("no purchase found for session {}, event {} ignored", session_id, event.id);
                    WebhookOutcome::Ignored
                }
            }
        }
        CHECKOUT_EXPIRED | ASYNC_PAYMENT_FAILED => {
            if cancel_pending(database, &session_id).await? {
                info!("pending purchase for session {} dropped ({})", session_id, event.kind);
                WebhookOutcome::Cancelled(session_id)
            } else {
                WebhookOutcome::Ignored
            }
        }
        other => {
            info!("unhandled event type {}", other);
            WebhookOutcome::Ignored
        }
    };
    Ok(outcome)
}

async fn purchases_with_status(
    database: &SqlitePool,
    user_id: i64,
    status: PurchaseStatus,
) -> Result<Vec<PurchasedCourse>> {
    let purchases = sqlx::query_as::<_, Purchase>(
        "SELECT * FROM purchase WHERE user_id = ? AND status = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .bind(status)
    .fetch_all(database)
    .await?;
    let mut result = Vec::with_capacity(purchases.len());
    for purchase in purchases {
        let course = course::get_course(database, purchase.course_id).await?;
        result.push(PurchasedCourse {
            course: course.into(),
            purchase,
        });
    }
    Ok(result)
}

pub async fn purchased_courses(database: &SqlitePool, user_id: i64) -> Result<Vec<PurchasedCourse>> {
    purchases_with_status(database, user_id, PurchaseStatus::Completed).await
}

/// Newest pending purchase per course; older sessions for the same course stay payable.
pub async fn pending_purchases(database: &SqlitePool, user_id: i64) -> Result<Vec<PurchasedCourse>> {
    let mut pending = purchases_with_status(database, user_id, PurchaseStatus::Pending).await?;
    let mut seen = HashSet::new();
    pending.retain(|p| seen.insert(p.purchase.course_id));
    Ok(pending)
}

/// Completed and pending purchases merged per course; completed ones carry progress.
pub async fn my_learning(database: &SqlitePool, user_id: i64) -> Result<Vec<LearningEntry>> {
    let completed = purchased_courses(database, user_id).await?;
    let pending = pending_purchases(database, user_id).await?;
    let mut entries = Vec::with_capacity(completed.len() + pending.len());
    for item in completed {
        let progress = progress::summary(database, user_id, item.course.id).await?;
        entries.push(LearningEntry {
            course: item.course,
            status: PurchaseStatus::Completed,
            is_pending: false,
            progress: Some(progress),
        });
    }
    for item in pending {
        if entries.iter().any(|e| e.course.id == item.course.id) {
            continue;
        }
        entries.push(LearningEntry {
            course: item.course,
            status: PurchaseStatus::Pending,
            is_pending: true,
            progress: None,
        });
    }
    Ok(entries)
}

/// Course page for a signed-in user; locked videos are hidden unless they have access.
pub async fn course_detail_with_status(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
) -> Result<CourseWithStatus> {
    let mut detail = course::get_course_detail(database, course_id).await?;
    if !detail.course.is_published && detail.course.creator_id != user_id {
        return Err(Error::not_found("Course"));
    }
    let status = purchase_status(database, user_id, course_id).await?;
    let can_access = access_check(database, user_id, &detail.course).await?;
    if !can_access {
        detail.redact_locked_lectures();
    }
    Ok(CourseWithStatus {
        course: detail,
        purchased: status == Some(PurchaseStatus::Completed),
        pending: status == Some(PurchaseStatus::Pending),
        can_access,
    })
}

pub async fn instructor_sales(database: &SqlitePool, instructor_id: i64) -> Result<SalesReport> {
    let sales = sqlx::query_as::<_, CourseSales>(
        "SELECT course.id AS course_id, course.title AS course_title,
                COUNT(purchase.id) AS sales_count, COALESCE(SUM(purchase.amount), 0) AS revenue
         FROM course LEFT JOIN purchase ON purchase.course_id = course.id AND purchase.status = 'completed'
         WHERE course.creator_id = ?
         GROUP BY course.id, course.title
         ORDER BY revenue DESC, course.id ASC",
    )
    .bind(instructor_id)
    .fetch_all(database)
    .await?;
    Ok(SalesReport {
        total_sales: sales.iter().map(|s| s.sales_count).sum(),
        total_revenue: sales.iter().map(|s| s.revenue).sum(),
        sales,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        course::{set_published, tests::seed_course},
        db::connect_memory,
        user::{Role, create_user, tests::register_request},
    };
    use provider::tests::MockProvider;

    pub fn test_config() -> Config {
        Config {
            jwt_secret: "test-secret".to_string(),
            client_url: "http://localhost:5173".to_string(),
            payment: PaymentConfig {
                webhook_secret: "whsec_test".to_string(),
                ..PaymentConfig::default()
            },
            ..Config::default()
        }
    }

    pub fn completed_event(session_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": CHECKOUT_COMPLETED,
            "data": { "object": { "id": session_id, "payment_status": "paid" } }
        }))
        .unwrap()
    }

    fn signed(config: &Config, payload: &[u8]) -> String {
        webhook::sign(
            &config.payment.webhook_secret,
            now_utc().unix_timestamp(),
            payload,
        )
    }

    struct Fixture {
        database: SqlitePool,
        payments: MockProvider,
        config: Config,
        student: i64,
        instructor: i64,
        course: Course,
    }

    async fn fixture() -> Fixture {
        let database = connect_memory().await.unwrap();
        let (instructor, course) = seed_course(&database, 4, Some(30)).await;
        let course = set_published(&database, instructor, course.id, true)
            .await
            .unwrap();
        let student = create_user(&database, register_request("student", Role::Student))
            .await
            .unwrap();
        Fixture {
            database,
            payments: MockProvider::default(),
            config: test_config(),
            student,
            instructor,
            course,
        }
    }

    impl Fixture {
        async fn checkout(&self) -> Result<CheckoutResponse> {
            create_checkout(
                &self.database,
                &self.payments,
                &self.config,
                self.student,
                self.course.id,
            )
            .await
        }
    }

    #[tokio::test]
    async fn checkout_records_pending_purchase() {
        let f = fixture().await;
        let response = f.checkout().await.unwrap();
        assert_eq!(response.url, "https://checkout.example.com/pay/cs_test_1");
        let request = f.payments.requests.lock()[0].clone();
        assert_eq!(request.amount, 30);
        assert_eq!(
            request.success_url,
            format!("http://localhost:5173/courses-progress/{}", f.course.id)
        );
        assert_eq!(
            purchase_status(&f.database, f.student, f.course.id).await.unwrap(),
            Some(PurchaseStatus::Pending)
        );
        assert!(!access_check(&f.database, f.student, &f.course).await.unwrap());
    }

    #[tokio::test]
    async fn every_checkout_session_stays_payable() {
        let f = fixture().await;
        f.checkout().await.unwrap();
        f.checkout().await.unwrap();
        let pending = pending_purchases(&f.database, f.student).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].purchase.payment_id, "cs_test_2");

        let payload = completed_event("cs_test_1");
        let outcome = handle_webhook(
            &f.database,
            &f.config.payment,
            &payload,
            Some(&signed(&f.config, &payload)),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Completed(_)));
        assert!(access_check(&f.database, f.student, &f.course).await.unwrap());
        assert!(pending_purchases(&f.database, f.student).await.unwrap().is_empty());

        let late = completed_event("cs_test_2");
        let outcome = handle_webhook(
            &f.database,
            &f.config.payment,
            &late,
            Some(&signed(&f.config, &late)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM purchase")
            .fetch_one(&f.database)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn webhook_completes_purchase_and_enrolls() {
        let f = fixture().await;
        f.checkout().await.unwrap();
        let payload = completed_event("cs_test_1");
        let outcome = handle_webhook(
            &f.database,
            &f.config.payment,
            &payload,
            Some(&signed(&f.config, &payload)),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Completed(_)));
        assert!(access_check(&f.database, f.student, &f.course).await.unwrap());
        let enrolled = crate::user::get_enrolled_courses(&f.database, f.student)
            .await
            .unwrap();
        assert_eq!(enrolled[0].id, f.course.id);
        let err = f.checkout().await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_changes_nothing() {
        let f = fixture().await;
        f.checkout().await.unwrap();
        let payload = completed_event("cs_test_1");
        let forged = webhook::sign("whsec_forged", now_utc().unix_timestamp(), &payload);
        let err = handle_webhook(&f.database, &f.config.payment, &payload, Some(&forged))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
        let err = handle_webhook(&f.database, &f.config.payment, &payload, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
        assert_eq!(
            purchase_status(&f.database, f.student, f.course.id).await.unwrap(),
            Some(PurchaseStatus::Pending)
        );
    }

    #[tokio::test]
    async fn webhook_for_unknown_session_is_ignored() {
        let f = fixture().await;
        let payload = completed_event("cs_unknown");
        let outcome = handle_webhook(
            &f.database,
            &f.config.payment,
            &payload,
            Some(&signed(&f.config, &payload)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn expired_session_drops_pending_purchase() {
        let f = fixture().await;
        f.checkout().await.unwrap();
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_2",
            "type": CHECKOUT_EXPIRED,
            "data": { "object": { "id": "cs_test_1" } }
        }))
        .unwrap();
        let outcome = handle_webhook(
            &f.database,
            &f.config.payment,
            &payload,
            Some(&signed(&f.config, &payload)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WebhookOutcome::Cancelled("cs_test_1".to_string()));
        assert_eq!(
            purchase_status(&f.database, f.student, f.course.id).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn checkout_rejects_free_own_and_unpublished_courses() {
        let f = fixture().await;
        let err = create_checkout(&f.database, &f.payments, &f.config, f.instructor, f.course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let (_, free) = seed_course(&f.database, 1, None).await;
        set_published(&f.database, f.instructor, free.id, true)
            .await
            .unwrap();
        let err = create_checkout(&f.database, &f.payments, &f.config, f.student, free.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(access_check(&f.database, f.student, &course::get_course(&f.database, free.id).await.unwrap()).await.unwrap());

        let (_, draft) = seed_course(&f.database, 1, Some(10)).await;
        let err = create_checkout(&f.database, &f.payments, &f.config, f.student, draft.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(f.payments.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn my_learning_merges_pending_and_completed() {
        let f = fixture().await;
        let (_, other) = seed_course(&f.database, 2, Some(12)).await;
        set_published(&f.database, f.instructor, other.id, true)
            .await
            .unwrap();
        f.checkout().await.unwrap();
        create_checkout(&f.database, &f.payments, &f.config, f.student, other.id)
            .await
            .unwrap();
        complete_purchase(&f.database, "cs_test_1").await.unwrap();

        let entries = my_learning(&f.database, f.student).await.unwrap();
        assert_eq!(entries.len(), 2);
        let done = entries.iter().find(|e| e.course.id == f.course.id).unwrap();
        assert_eq!(done.status, PurchaseStatus::Completed);
        assert_eq!(done.progress.as_ref().unwrap().total_lectures, 4);
        let waiting = entries.iter().find(|e| e.course.id == other.id).unwrap();
        assert!(waiting.is_pending);
        assert!(waiting.progress.is_none());
    }

    #[tokio::test]
    async fn detail_with_status_tracks_purchase() {
        let f = fixture().await;
        let before = course_detail_with_status(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert!(!before.purchased && !before.pending && !before.can_access);
        assert!(before.course.lectures[1].video_url.is_none());

        f.checkout().await.unwrap();
        complete_purchase(&f.database, "cs_test_1").await.unwrap();
        let after = course_detail_with_status(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert!(after.purchased && after.can_access);
        assert!(after.course.lectures[1].video_url.is_some());
        assert_eq!(after.course.enrolled_students, 1);
    }

    #[tokio::test]
    async fn sales_count_only_completed_purchases() {
        let f = fixture().await;
        f.checkout().await.unwrap();
        let report = instructor_sales(&f.database, f.instructor).await.unwrap();
        assert_eq!(report.total_sales, 0);
        complete_purchase(&f.database, "cs_test_1").await.unwrap();
        let report = instructor_sales(&f.database, f.instructor).await.unwrap();
        assert_eq!(report.total_sales, 1);
        assert_eq!(report.total_revenue, 30);
        assert_eq!(report.sales[0].course_title, "Rust for Rustaceans");
    }
}
