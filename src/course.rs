use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::{Error, Result},
    progress,
    utils::now_utc,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CourseLevel {
    #[default]
    Beginner,
    Medium,
    Advanced,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub creator_id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub course_level: CourseLevel,
    /// Whole currency units, `None` until the instructor sets one
    pub price: Option<i64>,
    pub thumbnail: Option<String>,
    pub is_published: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Course {
    pub fn is_free(&self) -> bool {
        self.price.unwrap_or(0) == 0
    }
}

/// Catalog card, enough to list a course without its lectures.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub category: String,
    pub course_level: CourseLevel,
    pub price: Option<i64>,
    pub thumbnail: Option<String>,
    pub creator_id: i64,
}

impl From<Course> for CourseSummary {
    fn from(course: Course) -> Self {
        Self {
            id: course.id,
            title: course.title,
            subtitle: course.subtitle,
            category: course.category,
            course_level: course.course_level,
            price: course.price,
            thumbnail: course.thumbnail,
            creator_id: course.creator_id,
        }
    }
}

/// Highest accepted course price, in whole currency units.
pub const MAX_PRICE: i64 = 1_000_000;

const SUMMARY_COLUMNS: &str =
    "course.id, course.title, course.subtitle, course.category, course.course_level, course.price, course.thumbnail, course.creator_id";

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lecture {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub video_url: Option<String>,
    pub is_preview_free: bool,
    pub position: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub creator: Creator,
    pub lectures: Vec<Lecture>,
    pub enrolled_students: i64,
}

impl CourseDetail {
    /// Hide the video of every lecture that is not a free preview.
    pub fn redact_locked_lectures(&mut self) {
        for lecture in &mut self.lectures {
            if !lecture.is_preview_free {
                lecture.video_url = None;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateCourseRequest {
    pub title: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EditCourseRequest {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub course_level: Option<CourseLevel>,
    pub price: Option<i64>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LectureRequest {
    pub title: Option<String>,
    pub video_url: Option<String>,
    pub is_preview_free: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase", default)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Free text matched against title, subtitle and category
    pub query: Option<String>,
    /// Comma separated category names
    pub categories: Option<String>,
    /// `low` or `high`
    pub sort_by_price: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceOrder {
    Low,
    High,
}

impl SearchQuery {
    fn categories(&self) -> Vec<String> {
        self.categories
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn price_order(&self) -> Option<PriceOrder> {
        match self.sort_by_price.as_deref().map(str::trim) {
            Some("low") => Some(PriceOrder::Low),
            Some("high") => Some(PriceOrder::High),
            _ => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn create_course(
    database: &SqlitePool,
    creator_id: i64,
    req: CreateCourseRequest,
) -> Result<Course> {
    let title = non_empty(req.title);
    let category = non_empty(req.category);
    let (Some(title), Some(category)) = (title.clone(), category.clone()) else {
        let mut missing = Vec::new();
        if title.is_none() {
            missing.push("courseTitle".to_string());
        }
        if category.is_none() {
            missing.push("category".to_string());
        }
        return Err(Error::missing_fields(missing));
    };
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO course (creator_id, title, category, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(creator_id)
    .bind(&title)
    .bind(category)
    .bind(now)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("course {}-{} created by user {}", id, title, creator_id);
    get_course(database, id).await
}

pub async fn get_course(database: &SqlitePool, id: i64) -> Result<Course> {
    sqlx::query_as::<_, Course>("SELECT * FROM course WHERE id = ?")
        .bind(id)
        .fetch_optional(database)
        .await?
        .ok_or_else(|| Error::not_found("Course"))
}

/// Load a course and make sure `user_id` created it.
pub async fn get_owned_course(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<Course> {
    let course = get_course(database, course_id).await?;
    if course.creator_id != user_id {
        return Err(Error::Forbidden(
            "Only the course creator can modify this course".to_string(),
        ));
    }
    Ok(course)
}

pub async fn get_creator_courses(database: &SqlitePool, creator_id: i64) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT * FROM course WHERE creator_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(creator_id)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

pub async fn get_course_detail(database: &SqlitePool, id: i64) -> Result<CourseDetail> {
    let course = get_course(database, id).await?;
    let creator = sqlx::query_as::<_, Creator>(
        "SELECT id, first_name, last_name FROM user WHERE id = ?",
    )
    .bind(course.creator_id)
    .fetch_one(database)
    .await?;
    let lectures = get_lectures(database, id).await?;
    let enrolled_students =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM enrollment WHERE course_id = ?")
            .bind(id)
            .fetch_one(database)
            .await?;
    Ok(CourseDetail {
        course,
        creator,
        lectures,
        enrolled_students,
    })
}

pub async fn edit_course(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    req: EditCourseRequest,
) -> Result<Course> {
    let current = get_owned_course(database, user_id, course_id).await?;
    if let Some(price) = req.price {
        if price < 0 {
            return Err(Error::BadRequest("Course price cannot be negative".to_string()));
        }
        if price > MAX_PRICE {
            return Err(Error::BadRequest(format!(
                "Course price cannot exceed {MAX_PRICE}"
            )));
        }
    }
    sqlx::query(
        "UPDATE course SET title = ?, subtitle = ?, description = ?, category = ?, course_level = ?, price = ?, thumbnail = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(non_empty(req.title).unwrap_or(current.title))
    .bind(non_empty(req.subtitle).or(current.subtitle))
    .bind(non_empty(req.description).or(current.description))
    .bind(non_empty(req.category).unwrap_or(current.category))
    .bind(req.course_level.unwrap_or(current.course_level))
    .bind(req.price.or(current.price))
    .bind(non_empty(req.thumbnail).or(current.thumbnail))
    .bind(now_utc())
    .bind(course_id)
    .execute(database)
    .await?;
    get_course(database, course_id).await
}

pub async fn remove_course(database: &SqlitePool, user_id: i64, course_id: i64) -> Result<()> {
    get_owned_course(database, user_id, course_id).await?;
    sqlx::query("DELETE FROM course WHERE id = ?")
        .bind(course_id)
        .execute(database)
        .await?;
    info!("course {} removed by user {}", course_id, user_id);
    Ok(())
}

/// Publishing needs at least one lecture, unpublishing is always allowed.
pub async fn set_published(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    publish: bool,
) -> Result<Course> {
    get_owned_course(database, user_id, course_id).await?;
    if publish && count_lectures(database, course_id).await? == 0 {
        return Err(Error::BadRequest(
            "A course needs at least one lecture before it can be published".to_string(),
        ));
    }
    sqlx::query("UPDATE course SET is_published = ?, updated_at = ? WHERE id = ?")
        .bind(publish)
        .bind(now_utc())
        .bind(course_id)
        .execute(database)
        .await?;
    info!("course {} published = {}", course_id, publish);
    get_course(database, course_id).await
}

pub async fn get_published_courses(database: &SqlitePool) -> Result<Vec<CourseSummary>> {
    let courses = sqlx::query_as::<_, CourseSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM course WHERE is_published = 1 ORDER BY created_at DESC, id DESC"
    ))
    .fetch_all(database)
    .await?;
    Ok(courses)
}

pub async fn search_courses(database: &SqlitePool, query: &SearchQuery) -> Result<Vec<CourseSummary>> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {SUMMARY_COLUMNS} FROM course WHERE is_published = 1"
    ));
    if let Some(text) = non_empty(query.query.clone()) {
        let pattern = format!("%{text}%");
        builder
            .push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR subtitle LIKE ")
            .push_bind(pattern.clone())
            .push(" OR category LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    let categories = query.categories();
    if !categories.is_empty() {
        builder.push(" AND lower(category) IN (");
        let mut separated = builder.separated(", ");
        for category in categories {
            separated.push_bind(category);
        }
        separated.push_unseparated(")");
    }
    builder.push(match query.price_order() {
        Some(PriceOrder::Low) => " ORDER BY COALESCE(price, 0) ASC, id ASC",
        Some(PriceOrder::High) => " ORDER BY COALESCE(price, 0) DESC, id ASC",
        None => " ORDER BY created_at DESC, id DESC",
    });
    let courses = builder
        .build_query_as::<CourseSummary>()
        .fetch_all(database)
        .await?;
    Ok(courses)
}

pub async fn get_lectures(database: &SqlitePool, course_id: i64) -> Result<Vec<Lecture>> {
    let lectures = sqlx::query_as::<_, Lecture>(
        "SELECT * FROM lecture WHERE course_id = ? ORDER BY position, id",
    )
    .bind(course_id)
    .fetch_all(database)
    .await?;
    Ok(lectures)
}

pub async fn count_lectures(database: &SqlitePool, course_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM lecture WHERE course_id = ?")
        .bind(course_id)
        .fetch_one(database)
        .await?;
    Ok(count)
}

/// Lecture by id, only if it belongs to `course_id`.
pub async fn get_course_lecture(database: &SqlitePool, course_id: i64, lecture_id: i64) -> Result<Lecture> {
    sqlx::query_as::<_, Lecture>("SELECT * FROM lecture WHERE id = ? AND course_id = ?")
        .bind(lecture_id)
        .bind(course_id)
        .fetch_optional(database)
        .await?
        .ok_or_else(|| Error::not_found("Lecture"))
}

pub async fn create_lecture(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    req: LectureRequest,
) -> Result<Lecture> {
    get_owned_course(database, user_id, course_id).await?;
    let Some(title) = non_empty(req.title) else {
        return Err(Error::missing_fields(vec!["lectureTitle".to_string()]));
    };
    let id = sqlx::query(
        "INSERT INTO lecture (course_id, title, video_url, is_preview_free, position, created_at)
         VALUES (?, ?, ?, ?, (SELECT COALESCE(MAX(position), 0) + 1 FROM lecture WHERE course_id = ?), ?)",
    )
    .bind(course_id)
    .bind(&title)
    .bind(non_empty(req.video_url))
    .bind(req.is_preview_free.unwrap_or(false))
    .bind(course_id)
    .bind(now_utc())
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("lecture {}-{} added to course {}", id, title, course_id);
    get_course_lecture(database, course_id, id).await
}

pub async fn edit_lecture(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    lecture_id: i64,
    req: LectureRequest,
) -> Result<Lecture> {
    get_owned_course(database, user_id, course_id).await?;
    let current = get_course_lecture(database, course_id, lecture_id).await?;
    sqlx::query("UPDATE lecture SET title = ?, video_url = ?, is_preview_free = ? WHERE id = ?")
        .bind(non_empty(req.title).unwrap_or(current.title))
        .bind(non_empty(req.video_url).or(current.video_url))
        .bind(req.is_preview_free.unwrap_or(current.is_preview_free))
        .bind(lecture_id)
        .execute(database)
        .await?;
    get_course_lecture(database, course_id, lecture_id).await
}

/// Learners left with every remaining lecture viewed get the course completed.
pub async fn remove_lecture(
    database: &SqlitePool,
    user_id: i64,
    course_id: i64,
    lecture_id: i64,
) -> Result<()> {
    get_owned_course(database, user_id, course_id).await?;
    get_course_lecture(database, course_id, lecture_id).await?;
    let waiting = progress::learners_missing_lecture(database, course_id, lecture_id).await?;
    sqlx::query("DELETE FROM lecture WHERE id = ?")
        .bind(lecture_id)
        .execute(database)
        .await?;
    info!("lecture {} removed from course {}", lecture_id, course_id);
    progress::complete_covered(database, &waiting, course_id).await
}
