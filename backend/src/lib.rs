use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use draw_core::{DrawError, ParticipantId};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

const JOIN_CODE_LEN: usize = 6;
// No 0/O/1/I/L: codes get read aloud and typed from phones.
const JOIN_CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

#[derive(Clone)]
pub struct AppState {
    groups: Arc<RwLock<HashMap<String, GroupRecord>>>,
    persist_path: Option<PathBuf>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            persist_path: None,
        }
    }
}

impl AppState {
    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = Self::default();
        state.persist_path = Some(path.clone());
        if let Ok(bytes) = tokio::fs::read(&path).await {
            if let Ok(saved) = serde_json::from_slice::<HashMap<String, GroupRecord>>(&bytes) {
                let mut groups = state.groups.write().await;
                *groups = saved;
            }
        }
        state
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = {
                let groups = self.groups.read().await;
                groups.clone()
            };
            if let Ok(json) = serde_json::to_vec_pretty(&snapshot) {
                if let Err(err) = tokio::fs::write(path, json).await {
                    eprintln!("persist error: {err}");
                }
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub join_code: String,
    pub admin_secret: String,
    pub budget_limit: Option<f64>,
    pub custom_message: Option<String>,
    pub participants: Vec<ParticipantRecord>,
    pub assignments: Vec<AssignmentRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub name: String,
    pub contact: String,
    pub wishlist: Option<String>,
    pub joined_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub giver_id: String,
    pub receiver_id: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/group", post(create_group))
        .route("/join", post(join_group))
        .route("/group/:id", get(get_group))
        .route("/group/:id/draw", post(draw_names))
        .route("/group/:id/assignment/:participant_id", get(get_assignment))
        .route("/group/:id/notifications", get(get_notifications))
        .with_state(state)
}

fn admin_password() -> String {
    env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "changeme".to_string())
}

fn new_join_code(groups: &HashMap<String, GroupRecord>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code: String = (0..JOIN_CODE_LEN)
            .map(|_| JOIN_CODE_CHARS[rng.gen_range(0..JOIN_CODE_CHARS.len())] as char)
            .collect();
        if !groups.values().any(|g| g.join_code == code) {
            return code;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    budget_limit: Option<f64>,
    custom_message: Option<String>,
}

#[derive(Serialize)]
struct CreateGroupResponse {
    group_id: String,
    join_code: String,
    admin_secret: String,
}

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGroupRequest>,
) -> impl IntoResponse {
    let expected = admin_password();
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }

    let mut groups = state.groups.write().await;
    let group_id = Uuid::new_v4().to_string();
    let admin_secret = Uuid::new_v4().to_string();
    let join_code = new_join_code(&groups);
    let record = GroupRecord {
        id: group_id.clone(),
        name: name.to_string(),
        join_code: join_code.clone(),
        admin_secret: admin_secret.clone(),
        budget_limit: payload.budget_limit,
        custom_message: payload.custom_message,
        participants: Vec::new(),
        assignments: Vec::new(),
    };
    groups.insert(group_id.clone(), record);
    drop(groups);
    state.persist().await;

    (
        StatusCode::CREATED,
        Json(CreateGroupResponse {
            group_id,
            join_code,
            admin_secret,
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct JoinRequest {
    join_code: String,
    name: String,
    contact: String,
    wishlist: Option<String>,
}

#[derive(Serialize)]
struct JoinResponse {
    group_id: String,
    participant_id: String,
}

async fn join_group(
    State(state): State<AppState>,
    Json(payload): Json<JoinRequest>,
) -> impl IntoResponse {
    let name = payload.name.trim();
    let contact = payload.contact.trim();
    if name.is_empty() || contact.is_empty() {
        return (StatusCode::BAD_REQUEST, "name and contact required").into_response();
    }

    let code = payload.join_code.trim().to_uppercase();
    let mut groups = state.groups.write().await;
    let group = match groups.values_mut().find(|g| g.join_code == code) {
        Some(group) => group,
        None => return (StatusCode::NOT_FOUND, "group not found").into_response(),
    };

    if !group.assignments.is_empty() {
        return (StatusCode::CONFLICT, "draw already performed").into_response();
    }

    if group.participants.iter().any(|p| p.name == name) {
        return (StatusCode::CONFLICT, "name taken").into_response();
    }

    let participant_id = Uuid::new_v4().to_string();
    group.participants.push(ParticipantRecord {
        id: participant_id.clone(),
        name: name.to_string(),
        contact: contact.to_string(),
        wishlist: payload.wishlist.clone(),
        joined_at: now_millis(),
    });
    let group_id = group.id.clone();

    drop(groups);
    state.persist().await;

    (
        StatusCode::OK,
        Json(JoinResponse {
            group_id,
            participant_id,
        }),
    )
        .into_response()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ParticipantView {
    id: String,
    name: String,
    contact: String,
    wishlist: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GroupView {
    id: String,
    name: String,
    join_code: String,
    budget_limit: Option<f64>,
    custom_message: Option<String>,
    participants: Vec<ParticipantView>,
    has_assignments: bool,
}

// Admin secret and raw assignments never leave through the view.
fn to_view(group: &GroupRecord) -> GroupView {
    GroupView {
        id: group.id.clone(),
        name: group.name.clone(),
        join_code: group.join_code.clone(),
        budget_limit: group.budget_limit,
        custom_message: group.custom_message.clone(),
        participants: group
            .participants
            .iter()
            .map(|p| ParticipantView {
                id: p.id.clone(),
                name: p.name.clone(),
                contact: p.contact.clone(),
                wishlist: p.wishlist.clone(),
            })
            .collect(),
        has_assignments: !group.assignments.is_empty(),
    }
}

async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> impl IntoResponse {
    let groups = state.groups.read().await;
    let Some(group) = groups.get(&group_id) else {
        return (StatusCode::NOT_FOUND, "group not found").into_response();
    };

    (StatusCode::OK, Json(to_view(group))).into_response()
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct DrawResponse {
    assignment_count: usize,
    replaced: bool,
}

async fn draw_names(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> impl IntoResponse {
    let mut groups = state.groups.write().await;
    let group = match groups.get_mut(&group_id) {
        Some(g) => g,
        None => return (StatusCode::NOT_FOUND, "group not found").into_response(),
    };

    let Some(secret) = headers.get("x-admin-secret").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, "admin secret required").into_response();
    };
    if secret != group.admin_secret {
        return (StatusCode::UNAUTHORIZED, "invalid admin secret").into_response();
    }

    let roster: Vec<ParticipantId> = group.participants.iter().map(|p| p.id.clone()).collect();
    let mut rng = params
        .seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);

    let assignments = match draw_core::generate_with_rng(&roster, &mut rng) {
        Ok(assignments) => assignments,
        Err(err @ DrawError::InsufficientParticipants { .. }) => {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
        Err(err) => {
            // InvalidRoster or an invariant violation: both mean a bug, not
            // bad user input. Log and refuse; never retried here.
            eprintln!("draw failed for group {group_id}: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "draw failed").into_response();
        }
    };

    let replaced = !group.assignments.is_empty();
    // Old set is discarded and the new one installed under the write lock,
    // so readers observe all-old or all-new, never a mixture.
    group.assignments = assignments
        .into_iter()
        .map(|a| AssignmentRecord {
            giver_id: a.giver,
            receiver_id: a.receiver,
        })
        .collect();

    let response = (
        StatusCode::OK,
        Json(DrawResponse {
            assignment_count: group.assignments.len(),
            replaced,
        }),
    )
        .into_response();

    drop(groups);
    state.persist().await;

    response
}

#[derive(Debug, thiserror::Error)]
enum AssignmentLookupError {
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("draw not performed")]
    DrawNotPerformed,
    #[error("assignment references unknown participant {0}")]
    MissingReceiver(String),
}

fn lookup_receiver<'a>(
    group: &'a GroupRecord,
    giver_id: &str,
) -> Result<&'a ParticipantRecord, AssignmentLookupError> {
    if !group.participants.iter().any(|p| p.id == giver_id) {
        return Err(AssignmentLookupError::ParticipantNotFound);
    }

    let assignment = group
        .assignments
        .iter()
        .find(|a| a.giver_id == giver_id)
        .ok_or(AssignmentLookupError::DrawNotPerformed)?;

    group
        .participants
        .iter()
        .find(|p| p.id == assignment.receiver_id)
        .ok_or_else(|| AssignmentLookupError::MissingReceiver(assignment.receiver_id.clone()))
}

#[derive(Serialize)]
struct ReceiverView {
    name: String,
    wishlist: Option<String>,
}

#[derive(Serialize)]
struct AssignmentResponse {
    receiver: ReceiverView,
    budget_limit: Option<f64>,
    custom_message: Option<String>,
}

async fn get_assignment(
    State(state): State<AppState>,
    Path((group_id, participant_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let groups = state.groups.read().await;
    let Some(group) = groups.get(&group_id) else {
        return (StatusCode::NOT_FOUND, "group not found").into_response();
    };

    let receiver = match lookup_receiver(group, &participant_id) {
        Ok(receiver) => receiver,
        Err(err @ AssignmentLookupError::ParticipantNotFound)
        | Err(err @ AssignmentLookupError::DrawNotPerformed) => {
            return (StatusCode::NOT_FOUND, err.to_string()).into_response();
        }
        Err(err @ AssignmentLookupError::MissingReceiver(_)) => {
            eprintln!("assignment lookup failed for group {group_id}: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "assignment data corrupt").into_response();
        }
    };

    (
        StatusCode::OK,
        Json(AssignmentResponse {
            receiver: ReceiverView {
                name: receiver.name.clone(),
                wishlist: receiver.wishlist.clone(),
            },
            budget_limit: group.budget_limit,
            custom_message: group.custom_message.clone(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct Notification {
    to: String,
    subject: String,
    body: String,
}

#[derive(Serialize)]
struct SkippedNotification {
    name: String,
    reason: String,
}

#[derive(Serialize)]
struct NotificationsResponse {
    notifications: Vec<Notification>,
    skipped: Vec<SkippedNotification>,
    total: usize,
}

fn notification_body(
    group: &GroupRecord,
    giver: &ParticipantRecord,
    receiver: &ParticipantRecord,
) -> String {
    let mut body = format!(
        "Hi {},\n\nThe draw for \"{}\" is done! You are giving a gift to: {}.\n",
        giver.name, group.name, receiver.name
    );
    if let Some(wishlist) = &receiver.wishlist {
        body.push_str(&format!("\nWishlist: {wishlist}\n"));
    }
    if let Some(limit) = group.budget_limit {
        body.push_str(&format!("\nBudget limit: ${limit:.2}\n"));
    }
    if let Some(message) = &group.custom_message {
        body.push_str(&format!("\nMessage from the organizer: {message}\n"));
    }
    body.push_str("\nKeep your match a secret!");
    body
}

async fn get_notifications(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let groups = state.groups.read().await;
    let Some(group) = groups.get(&group_id) else {
        return (StatusCode::NOT_FOUND, "group not found").into_response();
    };

    let Some(secret) = headers.get("x-admin-secret").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, "admin secret required").into_response();
    };
    if secret != group.admin_secret {
        return (StatusCode::UNAUTHORIZED, "invalid admin secret").into_response();
    }

    if group.assignments.is_empty() {
        return (StatusCode::NOT_FOUND, "draw not performed").into_response();
    }

    let mut notifications = Vec::new();
    let mut skipped = Vec::new();
    for assignment in &group.assignments {
        let Some(giver) = group
            .participants
            .iter()
            .find(|p| p.id == assignment.giver_id)
        else {
            eprintln!(
                "notification skipped for group {group_id}: unknown giver {}",
                assignment.giver_id
            );
            continue;
        };
        let receiver = match lookup_receiver(group, &giver.id) {
            Ok(receiver) => receiver,
            Err(err) => {
                eprintln!("notification skipped for group {group_id}: {err}");
                continue;
            }
        };

        if !giver.contact.contains('@') {
            skipped.push(SkippedNotification {
                name: giver.name.clone(),
                reason: "contact is not an email".to_string(),
            });
            continue;
        }

        notifications.push(Notification {
            to: giver.contact.clone(),
            subject: format!("Your Secret Santa match in {}", group.name),
            body: notification_body(group, giver, receiver),
        });
    }

    let total = group.assignments.len();
    (
        StatusCode::OK,
        Json(NotificationsResponse {
            notifications,
            skipped,
            total,
        }),
    )
        .into_response()
}
