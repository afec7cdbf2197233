use serde::{Deserialize, Deserializer, Serialize};

/// Backend ids come back as JSON numbers from some endpoints and strings from others.
fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "USER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().trim_start_matches("ROLE_") {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "flexible_id")]
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

/// Partial user update, only the set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

// ---- auth ----

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: AuthUser,
    #[serde(default)]
    pub role: String,
}

// ---- trip groups ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripGroup {
    #[serde(deserialize_with = "flexible_id")]
    pub trip_group_id: String,
    pub trip_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dates: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(default)]
    pub members: Vec<User>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polls: Vec<Poll>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist_items: Vec<ChecklistItem>,
}

impl TripGroup {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn member_name(&self, user_id: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.username.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripGroupPayload {
    pub trip_name: String,
    pub trip_description: String,
    pub trip_destination: String,
    pub trip_start_date: String,
    pub trip_end_date: String,
    pub trip_avatar_url: String,
}

// ---- chat ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "flexible_id")]
    pub group_id: String,
    #[serde(deserialize_with = "flexible_id")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_username: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

// ---- polls ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    #[serde(deserialize_with = "flexible_id")]
    pub option_id: String,
    pub option_text: String,
    #[serde(default)]
    pub vote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    #[serde(deserialize_with = "flexible_id")]
    pub poll_id: String,
    pub question: String,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.vote_count).sum()
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.option_id == option_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollOption {
    pub option_id: String,
    pub option_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollRequest {
    pub question: String,
    pub options: Vec<UpdatePollOption>,
}

/// Tally pushed by the backend on the poll topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdate {
    #[serde(deserialize_with = "flexible_id")]
    pub poll_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub options: Vec<OptionTally>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    #[serde(deserialize_with = "flexible_id")]
    pub option_id: String,
    pub vote_count: u64,
}

/// A vote the current user already cast, as listed by `/user-vote/{userId}/votes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserVote {
    #[serde(deserialize_with = "flexible_id")]
    pub poll_id: String,
    #[serde(deserialize_with = "flexible_id")]
    pub option_id: String,
}

// ---- checklist ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<i64>,
    pub task: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

impl ChecklistItem {
    pub fn new(task: impl Into<String>, assigned_to: impl Into<String>) -> Self {
        Self {
            item_id: None,
            task: task.into(),
            assigned_to: assigned_to.into(),
            done: false,
            due_date: None,
        }
    }
}

// ---- flights ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    #[serde(deserialize_with = "flexible_id")]
    pub flight_id: String,
    pub flight_number: String,
    pub departure_time: String,
    pub arrival_time: String,
    #[serde(default)]
    pub origin_airport_id: String,
    #[serde(default)]
    pub origin_airport_name: String,
    #[serde(default)]
    pub destination_airport_id: String,
    #[serde(default)]
    pub destination_airport_name: String,
    #[serde(default)]
    #[serde(deserialize_with = "flexible_id")]
    pub aircraft_id: String,
    #[serde(default)]
    pub airline: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightRequest {
    pub flight_number: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub origin_airport_id: String,
    pub destination_airport_id: String,
    #[serde(deserialize_with = "flexible_id")]
    pub aircraft_id: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Airport {
    #[serde(deserialize_with = "flexible_id")]
    pub airport_id: String,
    pub name: String,
    pub city: String,
    pub country: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportRequest {
    pub name: String,
    pub city: String,
    pub country: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aircraft {
    #[serde(deserialize_with = "flexible_id")]
    pub aircraft_id: String,
    pub model: String,
    pub capacity: u32,
    #[serde(default)]
    pub airline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftRequest {
    pub model: String,
    pub capacity: u32,
}

// ---- reservations ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    pub name: String,
    pub age: u32,
    pub gender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationUser {
    #[serde(deserialize_with = "flexible_id")]
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportSummary {
    pub code: String,
    pub city: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AircraftSummary {
    #[serde(deserialize_with = "flexible_id")]
    pub aircraft_id: String,
    pub model: String,
    #[serde(default)]
    pub airline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedFlight {
    #[serde(deserialize_with = "flexible_id")]
    pub flight_id: String,
    pub flight_number: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub origin: AirportSummary,
    pub destination: AirportSummary,
    pub aircraft: AircraftSummary,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(deserialize_with = "flexible_id")]
    pub reservation_id: String,
    pub user: ReservationUser,
    pub flight: ReservedFlight,
    #[serde(default)]
    pub seat_number: String,
    pub status: ReservationStatus,
    #[serde(default)]
    pub reservation_time: String,
    #[serde(default)]
    pub passengers: Vec<Passenger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    #[serde(deserialize_with = "flexible_id")]
    pub user_id: String,
    #[serde(deserialize_with = "flexible_id")]
    pub flight_id: String,
    pub passengers: Vec<Passenger>,
    pub status: ReservationStatus,
}
