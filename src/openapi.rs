use crate::models::{
    AnswerThread, Content, ContentKind, ContentView, NewQuestion, NewTag, NewUser, QuestionDetail, Score, Tag,
    TagDetail, TextBody, UpdateQuestion, User, UserProfile, VoteOutcome,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::list_users,
        crate::routes::get_user,
        crate::routes::list_questions,
        crate::routes::ask_question,
        crate::routes::question_detail,
        crate::routes::update_question,
        crate::routes::create_answer,
        crate::routes::update_answer,
        crate::routes::accept_answer,
        crate::routes::unaccept_answer,
        crate::routes::create_comment,
        crate::routes::update_comment,
        crate::routes::vote_up,
        crate::routes::vote_down,
        crate::routes::hide_content,
        crate::routes::unhide_content,
        crate::routes::admin_delete_content,
        crate::routes::admin_restore_content,
        crate::routes::list_tags,
        crate::routes::create_tag,
        crate::routes::tag_detail,
    ),
    components(schemas(
        Content, ContentKind, ContentView, AnswerThread, QuestionDetail, NewQuestion, UpdateQuestion, TextBody,
        Tag, NewTag, TagDetail, User, NewUser, UserProfile, Score, VoteOutcome,
        crate::routes::LoginRequest, crate::routes::LoginResponse, crate::routes::MeResponse
    )),
    tags(
        (name = "questions", description = "Questions, answers and comments"),
        (name = "votes", description = "Vote toggling"),
        (name = "tags", description = "Tag operations"),
    )
)]
pub struct ApiDoc;
