use std::sync::Arc;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{create_jwt, Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::require_role;
use crate::service::{Actor, Forum, ListParams};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/users").route(web::get().to(list_users)))
            .service(web::resource("/users/{username}").route(web::get().to(get_user)))
            .service(
                web::resource("/questions")
                    .route(web::get().to(list_questions))
                    .route(web::post().to(ask_question)),
            )
            .service(
                web::resource("/questions/{id}")
                    .route(web::get().to(question_detail))
                    .route(web::patch().to(update_question)),
            )
            // `answers` is also a valid question slug
            .service(
                web::resource("/questions/{id}/answers")
                    .route(web::get().to(question_detail))
                    .route(web::post().to(create_answer)),
            )
            .service(web::resource("/questions/{id}/{slug}").route(web::get().to(question_detail_by_slug)))
            .service(web::resource("/answers/{id}").route(web::patch().to(update_answer)))
            .service(web::resource("/answers/{id}/accept").route(web::post().to(accept_answer)))
            .service(web::resource("/answers/{id}/unaccept").route(web::post().to(unaccept_answer)))
            .service(web::resource("/content/{id}/comments").route(web::post().to(create_comment)))
            .service(web::resource("/comments/{id}").route(web::patch().to(update_comment)))
            .service(web::resource("/content/{id}/vote/up").route(web::post().to(vote_up)))
            .service(web::resource("/content/{id}/vote/down").route(web::post().to(vote_down)))
            .service(web::resource("/content/{id}/hide").route(web::post().to(hide_content)))
            .service(web::resource("/content/{id}/unhide").route(web::post().to(unhide_content)))
            // Admin moderation endpoints
            .service(web::resource("/admin/content/{id}/delete").route(web::post().to(admin_delete_content)))
            .service(web::resource("/admin/content/{id}/restore").route(web::post().to(admin_restore_content)))
            .service(
                web::resource("/tags")
                    .route(web::get().to(list_tags))
                    .route(web::post().to(create_tag)),
            )
            .service(web::resource("/tags/{slug}").route(web::get().to(tag_detail))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub forum: Forum,
    pub rate_limiter: Option<RateLimiterFacade>,
    pub admin_usernames: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(forum: Forum) -> Self {
        Self { forum, rate_limiter: None, admin_usernames: Arc::new(Vec::new()) }
    }

    fn roles_for(&self, username: &str) -> Vec<Role> {
        if self.admin_usernames.iter().any(|a| a == username) {
            vec![Role::User, Role::Admin]
        } else {
            vec![Role::User]
        }
    }

    fn check_post(&self, actor: &Actor) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) if !rl.allow_post(actor.user_id) => Err(ApiError::TooManyRequests),
            _ => Ok(()),
        }
    }

    fn check_vote(&self, actor: &Actor) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) if !rl.allow_vote(actor.user_id) => Err(ApiError::TooManyRequests),
            _ => Ok(()),
        }
    }
}

fn viewer(auth: &Option<Auth>) -> Result<Option<Actor>, ApiError> {
    auth.as_ref().map(Auth::actor).transpose()
}

// ---------------- auth & users -------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, description = "User registered", body = User),
        (status = 409, description = "Username taken"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn register(data: web::Data<AppState>, payload: web::Json<NewUser>) -> Result<HttpResponse, ApiError> {
    let user = data.forum.register(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(user))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Access token", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let user = data.forum.authenticate(&payload.username, &payload.password).await?;
    let token = create_jwt(user.id, &user.username, data.roles_for(&user.username)).map_err(|e| {
        tracing::error!("token creation failed: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok().json(LoginResponse { token, user }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub id: Id,
    pub username: String,
    pub role: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user info", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    // highest privilege wins
    let role = if actor.roles.contains(&Role::Admin) {
        "admin"
    } else if actor.roles.contains(&Role::Moderator) {
        "moderator"
    } else {
        "user"
    };
    Ok(HttpResponse::Ok().json(MeResponse { id: actor.user_id, username: actor.username, role: role.to_string() }))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses((status = 200, description = "List users", body = [User]))
)]
pub async fn list_users(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.forum.list_users().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "User and their questions", body = UserProfile),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&auth)?;
    let profile = data.forum.user_profile(viewer.as_ref(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

// ---------------- questions ----------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQueryParams {
    /// `hot` (default), `new` or `top`
    pub order: Option<String>,
    /// Tag slug
    pub tag: Option<String>,
    /// `with_answers`, `without_answers` or `without_accepted_answer`
    pub filter: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/questions",
    params(ListQueryParams),
    responses((status = 200, description = "List questions", body = [ContentView]))
)]
pub async fn list_questions(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<ListQueryParams>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&auth)?;
    let q = query.into_inner();
    let params = ListParams {
        order: ListOrder::parse_or_default(q.order.as_deref()),
        filter: QuestionFilter::parse_or_default(q.filter.as_deref()),
        tag: q.tag,
    };
    let items = data.forum.list_questions(viewer.as_ref(), params).await?;
    Ok(HttpResponse::Ok().json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/questions",
    request_body = NewQuestion,
    responses(
        (status = 201, description = "Question published", body = Content),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Validation error"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn ask_question(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewQuestion>) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    data.check_post(&actor)?;
    let item = data.forum.ask(&actor, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(item))
}

#[utoipa::path(
    get,
    path = "/api/v1/questions/{id}",
    params(("id" = i64, Path, description = "Question id")),
    responses(
        (status = 200, description = "Question with answers and comments", body = QuestionDetail),
        (status = 404, description = "Question not found")
    )
)]
pub async fn question_detail(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&auth)?;
    let detail = data.forum.question_detail(viewer.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// Same as [`question_detail`]; the slug is decorative.
pub async fn question_detail_by_slug(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<(Id, String)>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&auth)?;
    let (id, _slug) = path.into_inner();
    let detail = data.forum.question_detail(viewer.as_ref(), id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    patch,
    path = "/api/v1/questions/{id}",
    request_body = UpdateQuestion,
    params(("id" = i64, Path, description = "Question id")),
    responses(
        (status = 200, description = "Question updated", body = Content),
        (status = 404, description = "Not found or not owned"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn update_question(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateQuestion>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    let item = data.forum.update_question(&actor, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(item))
}

// ---------------- answers & comments -------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/questions/{id}/answers",
    request_body = TextBody,
    params(("id" = i64, Path, description = "Question id")),
    responses(
        (status = 201, description = "Answer published", body = Content),
        (status = 404, description = "Question not found"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn create_answer(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<TextBody>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    data.check_post(&actor)?;
    let item = data.forum.answer(&actor, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(item))
}

#[utoipa::path(
    patch,
    path = "/api/v1/answers/{id}",
    request_body = TextBody,
    params(("id" = i64, Path, description = "Answer id")),
    responses(
        (status = 200, description = "Answer updated", body = Content),
        (status = 404, description = "Not found or not owned")
    )
)]
pub async fn update_answer(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<TextBody>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    let item = data.forum.update_answer(&actor, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(item))
}

#[utoipa::path(
    post,
    path = "/api/v1/answers/{id}/accept",
    params(("id" = i64, Path, description = "Answer id")),
    responses(
        (status = 200, description = "Answer accepted", body = Content),
        (status = 403, description = "Only the asker may accept"),
        (status = 409, description = "Question already has an accepted answer")
    )
)]
pub async fn accept_answer(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    let item = data.forum.set_accepted(&actor, path.into_inner(), true).await?;
    Ok(HttpResponse::Ok().json(item))
}

#[utoipa::path(
    post,
    path = "/api/v1/answers/{id}/unaccept",
    params(("id" = i64, Path, description = "Answer id")),
    responses(
        (status = 200, description = "Answer no longer accepted", body = Content),
        (status = 403, description = "Only the asker may unaccept"),
        (status = 404, description = "Answer not found")
    )
)]
pub async fn unaccept_answer(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    let item = data.forum.set_accepted(&actor, path.into_inner(), false).await?;
    Ok(HttpResponse::Ok().json(item))
}

#[utoipa::path(
    post,
    path = "/api/v1/content/{id}/comments",
    request_body = TextBody,
    params(("id" = i64, Path, description = "Question or answer id")),
    responses(
        (status = 201, description = "Comment published", body = Content),
        (status = 404, description = "Parent not found"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<TextBody>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    data.check_post(&actor)?;
    let item = data.forum.comment(&actor, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(item))
}

#[utoipa::path(
    patch,
    path = "/api/v1/comments/{id}",
    request_body = TextBody,
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment updated", body = Content),
        (status = 404, description = "Not found or not owned")
    )
)]
pub async fn update_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<TextBody>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    let item = data.forum.update_comment(&actor, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(item))
}

// ---------------- votes --------------------------------------------

async fn cast_vote(auth: Option<Auth>, data: web::Data<AppState>, id: Id, value: VoteValue) -> Result<HttpResponse, ApiError> {
    let actor = viewer(&auth)?;
    if let Some(a) = actor.as_ref() {
        data.check_vote(a)?;
    }
    let outcome = data.forum.vote(actor.as_ref(), id, value).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/v1/content/{id}/vote/up",
    params(("id" = i64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Vote toggled", body = VoteOutcome),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Content not found")
    )
)]
pub async fn vote_up(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    cast_vote(auth, data, path.into_inner(), VoteValue::Up).await
}

#[utoipa::path(
    post,
    path = "/api/v1/content/{id}/vote/down",
    params(("id" = i64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Vote toggled", body = VoteOutcome),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Content not found")
    )
)]
pub async fn vote_down(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    cast_vote(auth, data, path.into_inner(), VoteValue::Down).await
}

// ---------------- hide / moderation --------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/content/{id}/hide",
    params(("id" = i64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Content hidden", body = Content),
        (status = 404, description = "Not found or not owned")
    )
)]
pub async fn hide_content(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    Ok(HttpResponse::Ok().json(data.forum.set_hidden(&actor, path.into_inner(), true).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/content/{id}/unhide",
    params(("id" = i64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Content visible again", body = Content),
        (status = 404, description = "Not found or not owned")
    )
)]
pub async fn unhide_content(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor()?;
    Ok(HttpResponse::Ok().json(data.forum.set_hidden(&actor, path.into_inner(), false).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/content/{id}/delete",
    params(("id" = i64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Content soft-deleted", body = Content),
        (status = 403, description = "Forbidden – Admins only"),
        (status = 404, description = "Content not found")
    )
)]
pub async fn admin_delete_content(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let actor = auth.actor()?;
    Ok(HttpResponse::Ok().json(data.forum.set_deleted(&actor, path.into_inner(), true).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/content/{id}/restore",
    params(("id" = i64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Content restored", body = Content),
        (status = 403, description = "Forbidden – Admins only"),
        (status = 404, description = "Content not found")
    )
)]
pub async fn admin_restore_content(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let actor = auth.actor()?;
    Ok(HttpResponse::Ok().json(data.forum.set_deleted(&actor, path.into_inner(), false).await?))
}

// ---------------- tags ---------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/tags",
    responses((status = 200, description = "List tags", body = [Tag]))
)]
pub async fn list_tags(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.forum.list_tags().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/tags",
    request_body = NewTag,
    responses(
        (status = 201, description = "Tag created", body = Tag),
        (status = 403, description = "Forbidden – Admins only"),
        (status = 409, description = "Conflict")
    )
)]
pub async fn create_tag(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewTag>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let actor = auth.actor()?;
    let tag = data.forum.create_tag(&actor, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(tag))
}

#[utoipa::path(
    get,
    path = "/api/v1/tags/{slug}",
    params(("slug" = String, Path, description = "Tag slug")),
    responses(
        (status = 200, description = "Tag and its questions", body = TagDetail),
        (status = 404, description = "Tag not found")
    )
)]
pub async fn tag_detail(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let viewer = viewer(&auth)?;
    let detail = data.forum.tag_detail(viewer.as_ref(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}
