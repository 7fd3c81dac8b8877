use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    course::{self, CourseDetail, Lecture},
    error::Result,
    purchase,
    utils::{now_utc, percentage},
};

/// Whether a single lecture of the course has been watched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LectureProgress {
    pub lecture_id: i64,
    pub viewed: bool,
}

/// Completion numbers for one user and one course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    /// Viewed lectures that still belong to the course
    pub viewed_count: i64,
    pub total_lectures: i64,
    /// `round(100 * viewed_count / total_lectures)`, 0 for a course without lectures
    pub percentage: i64,
    /// Set by full coverage or by hand
    pub completed: bool,
}

impl ProgressSummary {
    /// Only lectures present in `lecture_ids` count, stale ids in `viewed` are ignored.
    pub fn compute(lecture_ids: &[i64], viewed: &BTreeSet<i64>, completed: bool) -> Self {
        let total_lectures = lecture_ids.len() as i64;
        let viewed_count = lecture_ids.iter().filter(|id| viewed.contains(*id)).count() as i64;
        Self {
            viewed_count,
            total_lectures,
            percentage: percentage(viewed_count, total_lectures),
            completed,
        }
    }

    pub fn covers_all(&self) -> bool {
        self.total_lectures > 0 && self.viewed_count == self.total_lectures
    }
}

/// Progress page payload: the course, per-lecture state and the totals
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_details: CourseDetail,
    pub progress: Vec<LectureProgress>,
    #[serde(flatten)]
    pub summary: ProgressSummary,
}

impl CourseProgress {
    fn build(course_details: CourseDetail, viewed: &BTreeSet<i64>, completed: bool) -> Self {
        let lecture_ids: Vec<i64> = course_details.lectures.iter().map(|l| l.id).collect();
        let summary = ProgressSummary::compute(&lecture_ids, viewed, completed);
        let progress = course_details
            .lectures
            .iter()
            .map(|Lecture { id, .. }| LectureProgress {
                lecture_id: *id,
                viewed: viewed.contains(id),
            })
            .collect();
        Self {
            course_details,
            progress,
            summary,
        }
    }
}

async fn viewed_lectures(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<BTreeSet<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT lecture_progress.lecture_id FROM lecture_progress
         INNER JOIN lecture ON lecture.id = lecture_progress.lecture_id AND lecture.course_id = lecture_progress.course_id
         WHERE lecture_progress.user_id = ? AND lecture_progress.course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(database)
    .await?;
    Ok(ids.into_iter().collect())
}

async fn completed_flag(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<bool> {
    let completed = sqlx::query_scalar::<_, bool>(
        "SELECT completed FROM course_progress WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(database)
    .await?;
    Ok(completed.unwrap_or(false))
}

async fn upsert_record(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO course_progress (user_id, course_id, completed, updated_at) VALUES (?, ?, 0, ?)
         ON CONFLICT (user_id, course_id) DO UPDATE SET updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(now_utc())
    .execute(database)
    .await?;
    Ok(())
}

/// Totals without the access check or course details, for listings.
pub async fn summary(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<ProgressSummary> {
    let lecture_ids: Vec<i64> = course::get_lectures(database, course_id)
        .await?
        .into_iter()
        .map(|l| l.id)
        .collect();
    let viewed = viewed_lectures(database, user_id, course_id).await?;
    let completed = completed_flag(database, user_id, course_id).await?;
    Ok(ProgressSummary::compute(&lecture_ids, &viewed, completed))
}

/// A user without a record reads as nothing viewed, not completed. Nothing is written.
pub async fn get_progress(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<CourseProgress> {
    purchase::ensure_access(database, user_id, course_id).await?;
    let details = course::get_course_detail(database, course_id).await?;
    let viewed = viewed_lectures(database, user_id, course_id).await?;
    let completed = completed_flag(database, user_id, course_id).await?;
    Ok(CourseProgress::build(details, &viewed, completed))
}

/// Add `lecture_id` to the viewed set. The course flips to completed when this call
/// brings the viewed set to full coverage.
pub async fn mark_lecture_viewed(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    lecture_id: i64,
) -> Result<CourseProgress> {
    purchase::ensure_access(database, user_id, course_id).await?;
    course::get_course_lecture(database, course_id, lecture_id).await?;
    upsert_record(database, user_id, course_id).await?;
    let added = sqlx::query(
        "INSERT OR IGNORE INTO lecture_progress (user_id, course_id, lecture_id, viewed_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(lecture_id)
    .bind(now_utc())
    .execute(database)
    .await?
    .rows_affected()
        > 0;
    if added {
        let summary = summary(database, user_id, course_id).await?;
        if summary.covers_all() && !summary.completed {
            write_completed(database, user_id, course_id, true).await?;
            info!("user {} completed course {} by viewing every lecture", user_id, course_id);
        }
    }
    get_progress(database, user_id, course_id).await
}

async fn write_completed(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    completed: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO course_progress (user_id, course_id, completed, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, course_id) DO UPDATE SET completed = excluded.completed, updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(completed)
    .bind(now_utc())
    .execute(database)
    .await?;
    Ok(())
}

/// Learners with an open record for `course_id` who have not viewed `lecture_id`.
pub(crate) async fn learners_missing_lecture(
    database: &SqlitePool,
    course_id: i64,
    lecture_id: i64,
) -> Result<Vec<i64>> {
    let users = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM course_progress
         WHERE course_id = ? AND completed = 0
           AND NOT EXISTS (
               SELECT 1 FROM lecture_progress
               WHERE lecture_progress.user_id = course_progress.user_id
                 AND lecture_progress.course_id = course_progress.course_id
                 AND lecture_progress.lecture_id = ?
           )",
    )
    .bind(course_id)
    .bind(lecture_id)
    .fetch_all(database)
    .await?;
    Ok(users)
}

/// Complete the course for each of `users` whose viewed set now covers every lecture.
pub(crate) async fn complete_covered(database: &SqlitePool, users: &[i64], course_id: i64) -> Result<()> {
    for &user_id in users {
        let summary = summary(database, user_id, course_id).await?;
        if summary.covers_all() && !summary.completed {
            write_completed(database, user_id, course_id, true).await?;
            info!("user {} completed course {} after a lecture was removed", user_id, course_id);
        }
    }
    Ok(())
}

/// Manual override of the completed flag, the viewed set is left alone.
pub async fn set_completed(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    completed: bool,
) -> Result<CourseProgress> {
    purchase::ensure_access(database, user_id, course_id).await?;
    write_completed(database, user_id, course_id, completed).await?;
    info!("user {} set course {} completed = {}", user_id, course_id, completed);
    get_progress(database, user_id, course_id).await
}

/// Forget every viewed lecture and the completed flag so the course can be retaken.
pub async fn reset_progress(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<CourseProgress> {
    purchase::ensure_access(database, user_id, course_id).await?;
    sqlx::query("DELETE FROM lecture_progress WHERE user_id = ? AND course_id = ?")
        .bind(user_id)
        .bind(course_id)
        .execute(database)
        .await?;
    write_completed(database, user_id, course_id, false).await?;
    info!("user {} reset progress of course {}", user_id, course_id);
    get_progress(database, user_id, course_id).await
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        course::{Course, get_lectures, set_published, tests::seed_course},
        db::connect_memory,
        error::Error,
        purchase::complete_purchase,
        user::{Role, create_user, tests::register_request},
    };

    #[rstest]
    #[case(&[1, 2, 3, 4], &[1, 2, 3], 75, false)]
    #[case(&[1, 2, 3, 4], &[1, 2, 3, 4], 100, true)]
    #[case(&[1, 2, 3], &[9, 10], 0, false)]
    #[case(&[], &[], 0, false)]
    fn summary_counts_only_course_lectures(
        #[case] lectures: &[i64],
        #[case] viewed: &[i64],
        #[case] expected: i64,
        #[case] covered: bool,
    ) {
        let viewed: BTreeSet<i64> = viewed.iter().copied().collect();
        let summary = ProgressSummary::compute(lectures, &viewed, false);
        assert_eq!(summary.percentage, expected);
        assert_eq!(summary.covers_all(), covered);
        assert!(summary.viewed_count <= summary.total_lectures);
    }

    struct Fixture {
        database: SqlitePool,
        instructor: i64,
        student: i64,
        course: Course,
        lectures: Vec<i64>,
    }

    /// A paid, published four-lecture course the student has bought.
    async fn purchased() -> Fixture {
        let database = connect_memory().await.unwrap();
        let (instructor, course) = seed_course(&database, 4, Some(40)).await;
        set_published(&database, instructor, course.id, true)
            .await
            .unwrap();
        let student = create_user(&database, register_request("student", Role::Student))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO purchase (user_id, course_id, amount, status, payment_id, created_at, updated_at)
             VALUES (?, ?, 40, 'pending', 'cs_seed', ?, ?)",
        )
        .bind(student)
        .bind(course.id)
        .bind(now_utc())
        .bind(now_utc())
        .execute(&database)
        .await
        .unwrap();
        complete_purchase(&database, "cs_seed").await.unwrap();
        let lectures = get_lectures(&database, course.id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        Fixture {
            database,
            instructor,
            student,
            course,
            lectures,
        }
    }

    #[tokio::test]
    async fn four_lectures_three_viewed_then_all() {
        let f = purchased().await;
        let mut progress = None;
        for lecture in &f.lectures[..3] {
            progress = Some(
                mark_lecture_viewed(&f.database, f.student, f.course.id, *lecture)
                    .await
                    .unwrap(),
            );
        }
        let progress = progress.unwrap();
        assert_eq!(progress.summary.percentage, 75);
        assert!(!progress.summary.completed);
        assert_eq!(progress.progress.iter().filter(|p| p.viewed).count(), 3);

        let progress = mark_lecture_viewed(&f.database, f.student, f.course.id, f.lectures[3])
            .await
            .unwrap();
        assert_eq!(progress.summary.percentage, 100);
        assert!(progress.summary.completed);
    }

    #[tokio::test]
    async fn marking_twice_keeps_set_size() {
        let f = purchased().await;
        let once = mark_lecture_viewed(&f.database, f.student, f.course.id, f.lectures[0])
            .await
            .unwrap();
        let twice = mark_lecture_viewed(&f.database, f.student, f.course.id, f.lectures[0])
            .await
            .unwrap();
        assert_eq!(once.summary.viewed_count, 1);
        assert_eq!(twice.summary.viewed_count, 1);
        assert_eq!(twice.summary.percentage, 25);
    }

    #[tokio::test]
    async fn missing_record_reads_empty() {
        let f = purchased().await;
        let progress = get_progress(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert_eq!(progress.summary.viewed_count, 0);
        assert_eq!(progress.summary.total_lectures, 4);
        assert!(!progress.summary.completed);
        assert_eq!(progress.progress.len(), 4);
        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM course_progress")
            .fetch_one(&f.database)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn manual_toggle_is_independent_of_coverage() {
        let f = purchased().await;
        mark_lecture_viewed(&f.database, f.student, f.course.id, f.lectures[0])
            .await
            .unwrap();
        let done = set_completed(&f.database, f.student, f.course.id, true)
            .await
            .unwrap();
        assert!(done.summary.completed);
        assert_eq!(done.summary.viewed_count, 1);

        for lecture in &f.lectures {
            mark_lecture_viewed(&f.database, f.student, f.course.id, *lecture)
                .await
                .unwrap();
        }
        let undone = set_completed(&f.database, f.student, f.course.id, false)
            .await
            .unwrap();
        assert!(!undone.summary.completed);
        assert_eq!(undone.summary.percentage, 100);

        // re-marking adds nothing, so the manual override stands
        let again = mark_lecture_viewed(&f.database, f.student, f.course.id, f.lectures[0])
            .await
            .unwrap();
        assert!(!again.summary.completed);
    }

    #[tokio::test]
    async fn reset_clears_viewed_set() {
        let f = purchased().await;
        for lecture in &f.lectures {
            mark_lecture_viewed(&f.database, f.student, f.course.id, *lecture)
                .await
                .unwrap();
        }
        let reset = reset_progress(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert_eq!(reset.summary.viewed_count, 0);
        assert!(!reset.summary.completed);
    }

    #[tokio::test]
    async fn foreign_lecture_is_rejected() {
        let f = purchased().await;
        let (_, other) = seed_course(&f.database, 1, None).await;
        let foreign = get_lectures(&f.database, other.id).await.unwrap()[0].id;
        let err = mark_lecture_viewed(&f.database, f.student, f.course.id, foreign)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let progress = get_progress(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert_eq!(progress.summary.viewed_count, 0);
    }

    #[tokio::test]
    async fn paid_course_needs_purchase_or_ownership() {
        let f = purchased().await;
        let stranger = create_user(&f.database, register_request("stranger", Role::Student))
            .await
            .unwrap();
        let err = get_progress(&f.database, stranger, f.course.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        let err = mark_lecture_viewed(&f.database, stranger, f.course.id, f.lectures[0])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        sqlx::query(
            "INSERT INTO purchase (user_id, course_id, amount, status, payment_id, created_at, updated_at)
             VALUES (?, ?, 40, 'pending', 'cs_pending', ?, ?)",
        )
        .bind(stranger)
        .bind(f.course.id)
        .bind(now_utc())
        .bind(now_utc())
        .execute(&f.database)
        .await
        .unwrap();
        let err = set_completed(&f.database, stranger, f.course.id, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        get_progress(&f.database, f.instructor, f.course.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deleted_lecture_drops_out_of_progress() {
        let f = purchased().await;
        for lecture in &f.lectures[..2] {
            mark_lecture_viewed(&f.database, f.student, f.course.id, *lecture)
                .await
                .unwrap();
        }
        course::remove_lecture(&f.database, f.instructor, f.course.id, f.lectures[0])
            .await
            .unwrap();
        let progress = get_progress(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert_eq!(progress.summary.total_lectures, 3);
        assert_eq!(progress.summary.viewed_count, 1);
        assert_eq!(progress.summary.percentage, 33);
    }

    #[tokio::test]
    async fn removing_the_last_unviewed_lecture_completes_the_course() {
        let f = purchased().await;
        for lecture in &f.lectures[..3] {
            mark_lecture_viewed(&f.database, f.student, f.course.id, *lecture)
                .await
                .unwrap();
        }
        course::remove_lecture(&f.database, f.instructor, f.course.id, f.lectures[3])
            .await
            .unwrap();
        let progress = get_progress(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert_eq!(progress.summary.total_lectures, 3);
        assert_eq!(progress.summary.percentage, 100);
        assert!(progress.summary.completed);
    }

    #[tokio::test]
    async fn removing_a_viewed_lecture_keeps_a_manual_incomplete() {
        let f = purchased().await;
        for lecture in &f.lectures {
            mark_lecture_viewed(&f.database, f.student, f.course.id, *lecture)
                .await
                .unwrap();
        }
        set_completed(&f.database, f.student, f.course.id, false)
            .await
            .unwrap();
        course::remove_lecture(&f.database, f.instructor, f.course.id, f.lectures[0])
            .await
            .unwrap();
        let progress = get_progress(&f.database, f.student, f.course.id)
            .await
            .unwrap();
        assert_eq!(progress.summary.percentage, 100);
        assert!(!progress.summary.completed);
    }
}
