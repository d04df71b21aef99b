use std::sync::Arc;

use async_trait::async_trait;
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

pub const NAME: &str = "hospital";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppointmentSlot {
    pub doctor: String,
    pub specialty: String,
    pub date: String,
    pub time: String,
    pub booked_by: Option<String>,
}

impl AppointmentSlot {
    pub fn open(doctor: &str, specialty: &str, date: &str, time: &str) -> Self {
        Self {
            doctor: doctor.to_string(),
            specialty: specialty.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            booked_by: None,
        }
    }

    fn matches(&self, keyword: &str) -> bool {
        self.doctor.to_lowercase().contains(keyword)
            || self.specialty.to_lowercase().contains(keyword)
            || self.date == keyword
    }
}

#[derive(Serialize)]
struct SlotView<'a> {
    doctor: &'a str,
    specialty: &'a str,
    date: &'a str,
    time: &'a str,
    available: bool,
}

impl<'a> From<&'a AppointmentSlot> for SlotView<'a> {
    fn from(slot: &'a AppointmentSlot) -> Self {
        Self {
            doctor: &slot.doctor,
            specialty: &slot.specialty,
            date: &slot.date,
            time: &slot.time,
            available: slot.booked_by.is_none(),
        }
    }
}

/// Appointment slots shared by every hospital session.
#[derive(Debug, Default)]
pub struct AppointmentBook {
    slots: Mutex<Vec<AppointmentSlot>>,
}

impl AppointmentBook {
    pub fn new(slots: Vec<AppointmentSlot>) -> Self {
        Self { slots: Mutex::new(slots) }
    }

    pub fn sample() -> Self {
        Self::new(vec![
            AppointmentSlot::open("Dr. Amani", "cardiology", "2024-07-01", "09:00"),
            AppointmentSlot::open("Dr. Amani", "cardiology", "2024-07-01", "10:00"),
            AppointmentSlot::open("Dr. Okafor", "neurology", "2024-07-01", "11:00"),
            AppointmentSlot::open("Dr. Okafor", "neurology", "2024-07-02", "09:30"),
            AppointmentSlot::open("Dr. Lindqvist", "internal medicine", "2024-07-02", "13:00"),
            AppointmentSlot::open("Dr. Haddad", "dermatology", "2024-07-03", "15:00"),
        ])
    }

    pub async fn snapshot(&self) -> Vec<AppointmentSlot> {
        self.slots.lock().await.clone()
    }
}

pub fn descriptor() -> Result<ModuleDescriptor, DescriptorError> {
    ModuleDescriptor::new(
        NAME,
        "Hospital appointment desk",
        "You are a voice assistant working as a hospital appointment operator. Keep answers \
         short (two or three sentences) and never use emoji. Always look up appointments \
         before answering questions about availability.",
        with_common_functions(vec![
            FunctionSpec::new(
                "query_appointments",
                "Use this when the caller asks about appointments, doctors, specialties or dates.",
                ParameterSchema::object().required(
                    "query",
                    ParameterType::String,
                    "What to look for, e.g. 'all specialties' or 'cardiology on 2024-07-01'.",
                ),
            ),
            FunctionSpec::new(
                "book_appointment",
                "Use this when the caller wants to book a new appointment.",
                ParameterSchema::object()
                    .required("patient", ParameterType::String, "Name of the patient.")
                    .required("doctor", ParameterType::String, "Name of the doctor.")
                    .required("date", ParameterType::String, "Date as YYYY-MM-DD.")
                    .required("time", ParameterType::String, "Time as HH:MM."),
            ),
        ]),
    )
}

pub struct HospitalModule {
    descriptor: ModuleDescriptor,
    context: ModuleContext,
    book: Arc<AppointmentBook>,
}

impl HospitalModule {
    pub fn new(
        descriptor: ModuleDescriptor,
        context: ModuleContext,
        book: Arc<AppointmentBook>,
    ) -> Self {
        Self { descriptor, context, book }
    }

    async fn query_appointments(&self, query: &str) -> Result<String, FunctionError> {
        let slots = self.book.slots.lock().await;
        let words = keywords(query);

        let mut matched: Vec<&AppointmentSlot> =
            slots.iter().filter(|slot| words.iter().any(|word| slot.matches(word))).collect();
        if matched.is_empty() {
            matched = slots.iter().collect();
        }

        let views: Vec<SlotView<'_>> = matched.into_iter().map(SlotView::from).collect();
        to_content(&json!({ "query": query, "count": views.len(), "appointments": views }))
    }

    async fn book_appointment(
        &self,
        patient: &str,
        doctor: &str,
        date: &str,
        time: &str,
    ) -> Result<String, FunctionError> {
        let mut slots = self.book.slots.lock().await;
        let slot = slots
            .iter_mut()
            .find(|slot| {
                slot.doctor.eq_ignore_ascii_case(doctor) && slot.date == date && slot.time == time
            })
            .ok_or_else(|| {
                let message = format!("no appointment slot for {doctor} on {date} at {time}");
                FunctionError::domain(message)
            })?;

        if slot.booked_by.is_some() {
            return Err(FunctionError::domain(format!(
                "the {time} slot with {doctor} on {date} is already booked"
            )));
        }

        slot.booked_by = Some(patient.to_string());
        info!(
            event_name = "hospital.appointment_booked",
            doctor = %slot.doctor,
            date = %slot.date,
            time = %slot.time,
            "appointment booked"
        );

        to_content(&json!({
            "status": "success",
            "message": format!("Appointment booked for {patient}."),
            "appointment": SlotView::from(&*slot),
        }))
    }
}

#[async_trait]
impl Module for HospitalModule {
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
            "query_appointments" => {
                self.query_appointments(string_argument(arguments, "query")?).await
            }
            "book_appointment" => {
                self.book_appointment(
                    string_argument(arguments, "patient")?,
                    string_argument(arguments, "doctor")?,
                    string_argument(arguments, "date")?,
                    string_argument(arguments, "time")?,
                )
                .await
            }
            other => Err(FunctionError::unknown(other)),
        }
    }
}
