//! # Job board
//!
//! Employers post jobs and move applications through the hiring pipeline;
//! members search open jobs and apply. Jobs that are not open are visible only
//! to their owner and to admins; everyone else gets a 404.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use store::models::{
    ApplicationStatus, ApplicationWithJob, EmploymentType, Job, JobApplication, JobFilter, JobStatus, JobUpdate,
    NewApplication, NewJob, NotificationKind, Role, User,
};
use store::{Page, PageRequest, StoreError};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::email::{self, EmailTemplate};
use crate::error::{ApiError, ApiResult};
use crate::notifications::{self, Notice};
use crate::realtime::Event;
use crate::state::AppState;

pub const APPLICATION_UPDATED: &str = "application:updated";

#[derive(Debug, Default, Deserialize)]
pub struct JobSearch {
    pub q: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub remote: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JobInput {
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: EmploymentType,
    #[serde(default)]
    pub remote: bool,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplyInput {
    pub cover_letter: Option<String>,
    pub resume_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusInput {
    pub status: ApplicationStatus,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_salary(min: Option<i32>, max: Option<i32>) -> ApiResult<()> {
    if min.is_some_and(|m| m < 0) || max.is_some_and(|m| m < 0) {
        return Err(ApiError::bad_request("Salary cannot be negative"));
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ApiError::bad_request("salary_min cannot exceed salary_max"));
        }
    }
    Ok(())
}

fn can_manage(user: &User, job: &Job) -> bool {
    user.is_admin() || job.employer_id == user.id
}

/// A job the user may manage. Others get a 404.
async fn managed_job(state: &AppState, user: &User, job_id: Uuid) -> ApiResult<Job> {
    state
        .store
        .find_job(job_id)
        .await?
        .filter(|job| can_manage(user, job))
        .ok_or_else(|| ApiError::not_found("Job"))
}

pub async fn list_jobs(state: &AppState, search: JobSearch) -> ApiResult<Page<Job>> {
    let page = PageRequest {
        page: search.page,
        per_page: search.per_page,
    };
    let (items, total) = state
        .store
        .search_jobs(JobFilter {
            query: non_empty(search.q),
            location: non_empty(search.location),
            employment_type: search.employment_type,
            remote: search.remote,
            offset: page.offset(),
            limit: page.per_page(),
        })
        .await?;
    Ok(Page::new(items, page, total))
}

pub async fn get_job(state: &AppState, viewer: Option<&User>, job_id: Uuid) -> ApiResult<Job> {
    state
        .store
        .find_job(job_id)
        .await?
        .filter(|job| job.status == JobStatus::Open || viewer.is_some_and(|u| can_manage(u, job)))
        .ok_or_else(|| ApiError::not_found("Job"))
}

pub async fn create_job(state: &AppState, user: &User, input: JobInput) -> ApiResult<Job> {
    if !matches!(user.role, Role::Employer | Role::Admin) {
        return Err(ApiError::Forbidden("Only employers can post jobs".into()));
    }
    let title = input.title.trim();
    let description = input.description.trim();
    if title.is_empty() || description.is_empty() {
        return Err(ApiError::bad_request("Title and description are required"));
    }
    check_salary(input.salary_min, input.salary_max)?;

    let job = state
        .store
        .create_job(NewJob {
            employer_id: user.id,
            title: title.to_string(),
            description: description.to_string(),
            location: non_empty(input.location),
            employment_type: input.employment_type,
            remote: input.remote,
            salary_min: input.salary_min,
            salary_max: input.salary_max,
            status: input.status.unwrap_or(JobStatus::Open),
            created_at: Utc::now(),
        })
        .await?;
    tracing::info!(job_id = %job.id, employer_id = %user.id, "job posted");
    Ok(job)
}

pub async fn update_job(state: &AppState, user: &User, job_id: Uuid, mut update: JobUpdate) -> ApiResult<Job> {
    let job = managed_job(state, user, job_id).await?;
    for field in [&mut update.title, &mut update.description] {
        if let Some(value) = field.as_mut() {
            *value = value.trim().to_string();
            if value.is_empty() {
                return Err(ApiError::bad_request("Title and description cannot be empty"));
            }
        }
    }
    check_salary(
        update.salary_min.or(job.salary_min),
        update.salary_max.or(job.salary_max),
    )?;
    Ok(state.store.update_job(job.id, update, Utc::now()).await?)
}

pub async fn close_job(state: &AppState, user: &User, job_id: Uuid) -> ApiResult<Job> {
    update_job(
        state,
        user,
        job_id,
        JobUpdate {
            status: Some(JobStatus::Closed),
            ..Default::default()
        },
    )
    .await
}

pub async fn apply(state: &AppState, user: &User, job_id: Uuid, input: ApplyInput) -> ApiResult<JobApplication> {
    let job = state
        .store
        .find_job(job_id)
        .await?
        .filter(|job| job.status == JobStatus::Open)
        .ok_or_else(|| ApiError::not_found("Job"))?;
    if job.employer_id == user.id {
        return Err(ApiError::bad_request("You cannot apply to your own job"));
    }

    let application = state
        .store
        .create_application(NewApplication {
            job_id,
            applicant_id: user.id,
            cover_letter: non_empty(input.cover_letter),
            resume_url: non_empty(input.resume_url),
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::Conflict("You have already applied to this job".into()),
            other => other.into(),
        })?;

    notifications::notify(
        state,
        job.employer_id,
        Notice::new(
            NotificationKind::Application,
            format!("New application for {}", job.title),
            format!("{} applied.", user.name),
        )
        .link(format!("/jobs/{job_id}/applications")),
    )
    .await?;
    Ok(application)
}

pub async fn job_applications(state: &AppState, user: &User, job_id: Uuid) -> ApiResult<Vec<JobApplication>> {
    let job = managed_job(state, user, job_id).await?;
    Ok(state.store.applications_for_job(job.id).await?)
}

pub async fn update_application_status(
    state: &AppState,
    user: &User,
    application_id: Uuid,
    status: ApplicationStatus,
) -> ApiResult<JobApplication> {
    let application = state
        .store
        .find_application(application_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Application"))?;
    let job = managed_job(state, user, application.job_id)
        .await
        .map_err(|_| ApiError::not_found("Application"))?;

    if !application.status.can_transition_to(status) {
        return Err(ApiError::bad_request(format!(
            "Cannot move an application from {} to {status}",
            application.status
        )));
    }

    let updated = state
        .store
        .set_application_status(application.id, status, Utc::now())
        .await?;

    state.hub.publish(
        updated.applicant_id,
        Event::new(APPLICATION_UPDATED, json!({ "application_id": updated.id, "status": status })),
    );
    notifications::notify(
        state,
        updated.applicant_id,
        Notice::new(
            NotificationKind::Application,
            format!("Application update: {}", job.title),
            format!("Your application is now {status}."),
        )
        .link("/applications"),
    )
    .await?;
    if let Some(applicant) = state.store.find_user(updated.applicant_id).await? {
        email::deliver(
            state,
            &applicant.email,
            EmailTemplate::ApplicationStatus {
                name: applicant.name.clone(),
                job_title: job.title.clone(),
                status,
            },
        )
        .await;
    }
    Ok(updated)
}

pub async fn withdraw_application(state: &AppState, user: &User, application_id: Uuid) -> ApiResult<JobApplication> {
    let application = state
        .store
        .find_application(application_id)
        .await?
        .filter(|a| a.applicant_id == user.id)
        .ok_or_else(|| ApiError::not_found("Application"))?;
    if application.status.is_final() {
        return Err(ApiError::bad_request(format!(
            "Cannot withdraw an application that is {}",
            application.status
        )));
    }
    Ok(state
        .store
        .set_application_status(application.id, ApplicationStatus::Withdrawn, Utc::now())
        .await?)
}

async fn index(State(state): State<AppState>, Query(search): Query<JobSearch>) -> ApiResult<Json<Page<Job>>> {
    list_jobs(&state, search).await.map(Json)
}

async fn show(
    State(state): State<AppState>,
    viewer: Option<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let viewer = viewer.map(|CurrentUser(user)| user);
    get_job(&state, viewer.as_ref(), id).await.map(Json)
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<JobInput>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = create_job(&state, &user, input).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn edit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(update): Json<JobUpdate>,
) -> ApiResult<Json<Job>> {
    update_job(&state, &user, id, update).await.map(Json)
}

async fn close(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    close_job(&state, &user, id).await.map(Json)
}

async fn apply_to_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<ApplyInput>,
) -> ApiResult<(StatusCode, Json<JobApplication>)> {
    let application = apply(&state, &user, id, input).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn applications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<JobApplication>>> {
    job_applications(&state, &user, id).await.map(Json)
}

async fn mine(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<ApplicationWithJob>>> {
    Ok(Json(state.store.applications_for_user(user.id).await?))
}

async fn set_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<StatusInput>,
) -> ApiResult<Json<JobApplication>> {
    update_application_status(&state, &user, id, input.status)
        .await
        .map(Json)
}

async fn withdraw(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobApplication>> {
    withdraw_application(&state, &user, id).await.map(Json)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(index).post(create))
        .route("/jobs/{id}", get(show).patch(edit))
        .route("/jobs/{id}/close", post(close))
        .route("/jobs/{id}/apply", post(apply_to_job))
        .route("/jobs/{id}/applications", get(applications))
        .route("/applications/mine", get(mine))
        .route("/applications/{id}/status", patch(set_status))
        .route("/applications/{id}/withdraw", post(withdraw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn input(title: &str) -> JobInput {
        JobInput {
            title: title.into(),
            description: "Work on Country with the ranger program.".into(),
            location: Some("Alice Springs".into()),
            employment_type: EmploymentType::FullTime,
            remote: false,
            salary_min: Some(60_000),
            salary_max: Some(80_000),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_only_employers_post() {
        let state = testing::state();
        let member = testing::user(&state, "member@example.org", Role::Member).await;
        let employer = testing::user(&state, "hr@example.org", Role::Employer).await;

        assert!(matches!(
            create_job(&state, &member, input("Ranger")).await,
            Err(ApiError::Forbidden(_))
        ));
        let job = create_job(&state, &employer, input("Ranger")).await.unwrap();
        assert_eq!(job.status, JobStatus::Open);

        let mut bad = input("Ranger");
        bad.salary_min = Some(90_000);
        assert!(matches!(create_job(&state, &employer, bad).await, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_draft_hidden_from_others() {
        let state = testing::state();
        let employer = testing::user(&state, "hr@example.org", Role::Employer).await;
        let member = testing::user(&state, "member@example.org", Role::Member).await;
        let mut draft = input("Coordinator");
        draft.status = Some(JobStatus::Draft);
        let job = create_job(&state, &employer, draft).await.unwrap();

        assert!(get_job(&state, Some(&employer), job.id).await.is_ok());
        assert!(matches!(get_job(&state, Some(&member), job.id).await, Err(ApiError::NotFound(_))));
        assert!(matches!(get_job(&state, None, job.id).await, Err(ApiError::NotFound(_))));
        assert_eq!(list_jobs(&state, JobSearch::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_search_filters_and_paginates() {
        let state = testing::state();
        let employer = testing::user(&state, "hr@example.org", Role::Employer).await;
        for title in ["Ranger", "Senior Ranger", "Nurse"] {
            create_job(&state, &employer, input(title)).await.unwrap();
        }
        let page = list_jobs(
            &state,
            JobSearch {
                q: Some("ranger".into()),
                per_page: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert!(page.has_more());
    }

    #[tokio::test]
    async fn test_application_pipeline() {
        let (state, mailer) = testing::state_with_mailer();
        let employer = testing::user(&state, "hr@example.org", Role::Employer).await;
        let applicant = testing::user(&state, "jo@example.org", Role::Member).await;
        let job = create_job(&state, &employer, input("Ranger")).await.unwrap();

        assert!(matches!(
            apply(&state, &employer, job.id, ApplyInput::default()).await,
            Err(ApiError::BadRequest(_))
        ));
        let application = apply(&state, &applicant, job.id, ApplyInput::default()).await.unwrap();
        assert!(matches!(
            apply(&state, &applicant, job.id, ApplyInput::default()).await,
            Err(ApiError::Conflict(_))
        ));

        assert!(matches!(
            update_application_status(&state, &employer, application.id, ApplicationStatus::Offered).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            update_application_status(&state, &applicant, application.id, ApplicationStatus::Reviewing).await,
            Err(ApiError::NotFound(_))
        ));
        let updated = update_application_status(&state, &employer, application.id, ApplicationStatus::Reviewing)
            .await
            .unwrap();
        assert_eq!(updated.status, ApplicationStatus::Reviewing);
        assert!(mailer
            .sent()
            .iter()
            .any(|m| m.to == "jo@example.org" && m.subject.contains("Ranger")));

        let withdrawn = withdraw_application(&state, &applicant, application.id).await.unwrap();
        assert_eq!(withdrawn.status, ApplicationStatus::Withdrawn);
        assert!(matches!(
            withdraw_application(&state, &applicant, application.id).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_job_rejects_applications() {
        let state = testing::state();
        let employer = testing::user(&state, "hr@example.org", Role::Employer).await;
        let applicant = testing::user(&state, "jo@example.org", Role::Member).await;
        let job = create_job(&state, &employer, input("Ranger")).await.unwrap();
        assert!(matches!(close_job(&state, &applicant, job.id).await, Err(ApiError::NotFound(_))));
        close_job(&state, &employer, job.id).await.unwrap();
        assert!(matches!(
            apply(&state, &applicant, job.id, ApplyInput::default()).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
