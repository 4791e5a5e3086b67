use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const DEEP_LINK_PREFIX: &str = "https://www.skyscanner.co.in";

/// Travel plan parameters submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    pub return_date: String,
    #[serde(default = "default_cabin_class")]
    pub cabin_class: String,
    #[serde(default = "default_passengers")]
    pub passengers: u32,
}

fn default_cabin_class() -> String {
    "economy".to_string()
}

fn default_passengers() -> u32 {
    1
}

impl PlanRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("origin", &self.origin),
            ("destination", &self.destination),
            ("departure_date", &self.departure_date),
            ("return_date", &self.return_date),
            ("cabin_class", &self.cabin_class),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::Empty { field });
            }
        }

        if self.passengers == 0 {
            return Err(ValidationError::Invalid {
                field: "passengers",
                reason: "at least one passenger is required".to_string(),
            });
        }

        if self.origin.trim().eq_ignore_ascii_case(self.destination.trim()) {
            return Err(ValidationError::Invalid {
                field: "destination",
                reason: "must differ from origin".to_string(),
            });
        }

        Ok(())
    }

    /// Render the natural-language query handed to the planning engine.
    pub fn to_query(&self) -> String {
        format!(
            "Search flight ticket and Hotel Accomodation. Use the following parameters:\n\
             - Departure city: {origin}\n\
             - Arrival city: {destination}\n\
             - Departure date: {departure}\n\
             - Return date: {return_date}\n\
             - Cabin class: {cabin}\n\
             - Number of passengers: {passengers}\n\
             Be sure to book both the departure and return flights.\n\
             Analyse the flights and accommodation data and return the best flight overview \
             with summary and Deeplink url to book and accommodation details with summary and url to book.\n\
             The Deeplink url should be appended to {DEEP_LINK_PREFIX}<CHOOSEN_DEEPLINK> before returning the response.",
            origin = self.origin.trim(),
            destination = self.destination.trim(),
            departure = self.departure_date.trim(),
            return_date = self.return_date.trim(),
            cabin = self.cabin_class.trim(),
            passengers = self.passengers,
        )
    }
}
