use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use concierge_agent::module::string_argument;
use concierge_agent::{Module, ModuleContext};
use concierge_core::{
    DescriptorError, FunctionError, FunctionSpec, ModuleDescriptor, ParameterSchema, ParameterType,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::common::{execute_common, keywords, to_content, with_common_functions};

pub const NAME: &str = "hotel";
pub const ROOM_TYPES: [&str; 3] = ["single", "double", "suite"];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub number: String,
    pub room_type: String,
    pub rate_per_night: u32,
    pub amenities: Vec<String>,
}

impl Room {
    pub fn new(number: &str, room_type: &str, rate_per_night: u32, amenities: &[&str]) -> Self {
        Self {
            number: number.to_string(),
            room_type: room_type.to_string(),
            rate_per_night,
            amenities: amenities.iter().map(|amenity| amenity.to_string()).collect(),
        }
    }

    fn matches(&self, keyword: &str) -> bool {
        self.number == keyword
            || self.room_type == keyword
            || self.amenities.iter().any(|amenity| amenity.to_lowercase().contains(keyword))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub room_number: String,
    pub guest_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Reservation {
    /// Nights are half-open: the check-out day is free for the next guest.
    fn occupies(&self, night: NaiveDate) -> bool {
        self.check_in <= night && night < self.check_out
    }

    fn overlaps(&self, check_in: NaiveDate, check_out: NaiveDate) -> bool {
        self.check_in < check_out && check_in < self.check_out
    }
}

/// Rooms and reservations shared by every hotel session.
#[derive(Debug, Default)]
pub struct HotelLedger {
    rooms: Vec<Room>,
    reservations: Mutex<Vec<Reservation>>,
}

impl HotelLedger {
    pub fn new(rooms: Vec<Room>, reservations: Vec<Reservation>) -> Self {
        Self { rooms, reservations: Mutex::new(reservations) }
    }

    pub fn sample() -> Self {
        Self::new(
            vec![
                Room::new("101", "single", 80, &["wifi", "garden view"]),
                Room::new("102", "single", 80, &["wifi"]),
                Room::new("201", "double", 120, &["wifi", "balcony"]),
                Room::new("202", "double", 125, &["wifi", "sea view"]),
                Room::new("301", "suite", 260, &["wifi", "sea view", "jacuzzi"]),
            ],
            Vec::new(),
        )
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.reservations.lock().await.clone()
    }
}

pub fn descriptor() -> Result<ModuleDescriptor, DescriptorError> {
    ModuleDescriptor::new(
        NAME,
        "Hotel front desk",
        "You are a voice assistant working at a hotel front desk. Keep answers short (two or \
         three sentences) and never use emoji. Check availability before promising a room.",
        with_common_functions(vec![
            FunctionSpec::new(
                "check_room_availability",
                "Check whether a room of the given type is free on a date.",
                ParameterSchema::object()
                    .required("date", ParameterType::String, "Night to check, as YYYY-MM-DD.")
                    .required_enum("roomType", "Kind of room.", ROOM_TYPES),
            ),
            FunctionSpec::new(
                "query_rooms",
                "Use this when the caller asks about rooms, prices or amenities.",
                ParameterSchema::object().required(
                    "query",
                    ParameterType::String,
                    "What to look for, e.g. 'sea view' or 'suite'.",
                ),
            ),
            FunctionSpec::new(
                "book_room",
                "Use this when the caller wants to reserve a room.",
                ParameterSchema::object()
                    .required("guest_name", ParameterType::String, "Name of the guest.")
                    .required("room_number", ParameterType::String, "Room number.")
                    .required("check_in", ParameterType::String, "Arrival date as YYYY-MM-DD.")
                    .required("check_out", ParameterType::String, "Departure date as YYYY-MM-DD."),
            ),
        ]),
    )
}

pub struct HotelModule {
    descriptor: ModuleDescriptor,
    context: ModuleContext,
    ledger: Arc<HotelLedger>,
}

impl HotelModule {
    pub fn new(
        descriptor: ModuleDescriptor,
        context: ModuleContext,
        ledger: Arc<HotelLedger>,
    ) -> Self {
        Self { descriptor, context, ledger }
    }

    async fn check_room_availability(
        &self,
        date: &str,
        room_type: &str,
    ) -> Result<String, FunctionError> {
        let night = parse_date("date", date)?;
        let reservations = self.ledger.reservations.lock().await;

        let free: Vec<&Room> = self
            .ledger
            .rooms
            .iter()
            .filter(|room| room.room_type == room_type)
            .filter(|room| {
                !reservations
                    .iter()
                    .any(|booking| booking.room_number == room.number && booking.occupies(night))
            })
            .collect();

        let cheapest = free.iter().map(|room| room.rate_per_night).min();
        to_content(&json!({
            "available": !free.is_empty(),
            "date": date,
            "roomType": room_type,
            "freeRooms": free.len(),
            "roomNumbers": free.iter().map(|room| room.number.as_str()).collect::<Vec<_>>(),
            "ratePerNight": cheapest,
        }))
    }

    fn query_rooms(&self, query: &str) -> Result<String, FunctionError> {
        let words = keywords(query);
        let mut matched: Vec<&Room> = self
            .ledger
            .rooms
            .iter()
            .filter(|room| words.iter().any(|word| room.matches(word)))
            .collect();
        if matched.is_empty() {
            matched = self.ledger.rooms.iter().collect();
        }

        to_content(&json!({ "query": query, "count": matched.len(), "rooms": matched }))
    }

    async fn book_room(
        &self,
        guest_name: &str,
        room_number: &str,
        check_in: &str,
        check_out: &str,
    ) -> Result<String, FunctionError> {
        let arrival = parse_date("check_in", check_in)?;
        let departure = parse_date("check_out", check_out)?;
        if arrival >= departure {
            return Err(FunctionError::domain("check_out must be after check_in"));
        }

        let room = self
            .ledger
            .rooms
            .iter()
            .find(|room| room.number == room_number)
            .ok_or_else(|| FunctionError::domain(format!("room {room_number} does not exist")))?;

        let mut reservations = self.ledger.reservations.lock().await;
        let conflict = reservations.iter().any(|booking| {
            booking.room_number == room.number && booking.overlaps(arrival, departure)
        });
        if conflict {
            return Err(FunctionError::domain(format!(
                "room {room_number} is already booked between {check_in} and {check_out}"
            )));
        }

        reservations.push(Reservation {
            room_number: room.number.clone(),
            guest_name: guest_name.to_string(),
            check_in: arrival,
            check_out: departure,
        });
        let nights = (departure - arrival).num_days();
        info!(
            event_name = "hotel.room_booked",
            room_number = %room.number,
            nights,
            "room booked"
        );

        to_content(&json!({
            "status": "success",
            "message": format!("Room {room_number} booked for {guest_name}."),
            "roomNumber": room.number,
            "checkIn": check_in,
            "checkOut": check_out,
            "nights": nights,
            "total": i64::from(room.rate_per_night) * nights,
        }))
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, FunctionError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        FunctionError::domain(format!("{field} must be formatted as YYYY-MM-DD, got `{value}`"))
    })
}

#[async_trait]
impl Module for HotelModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn execute_function(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<String, FunctionError> {
        if let Some(result) = execute_common(name, &self.context) {
            return result;
        }

        match name {
            "check_room_availability" => {
                self.check_room_availability(
                    string_argument(arguments, "date")?,
                    string_argument(arguments, "roomType")?,
                )
                .await
            }
            "query_rooms" => self.query_rooms(string_argument(arguments, "query")?),
            "book_room" => {
                self.book_room(
                    string_argument(arguments, "guest_name")?,
                    string_argument(arguments, "room_number")?,
                    string_argument(arguments, "check_in")?,
                    string_argument(arguments, "check_out")?,
                )
                .await
            }
            other => Err(FunctionError::unknown(other)),
        }
    }
}
