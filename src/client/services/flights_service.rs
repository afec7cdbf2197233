use chrono::NaiveDateTime;

use crate::client::services::api_client::ApiClient;
use crate::common::{
    Aircraft, AircraftRequest, Airport, AirportRequest, ClientError, ClientResult, Flight, FlightRequest,
    Reservation, ReservationRequest,
};

/// Format the backend's `LocalDateTime` parser accepts: no zone, no fraction.
pub fn to_local_date_time(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Accepts the `datetime-local` style `2025-04-06T10:00` as well as full seconds.
pub fn parse_departure(input: &str) -> ClientResult<NaiveDateTime> {
    let input = input.trim();
    NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M"))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| ClientError::validation(format!("invalid departure date '{}'", input)))
}

/// Flights, airports and aircraft catalogue.
#[derive(Debug, Clone)]
pub struct FlightsService {
    api: ApiClient,
}

impl FlightsService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn search(&self, origin: &str, destination: &str, departure: &NaiveDateTime) -> ClientResult<Vec<Flight>> {
        if origin.trim().is_empty() || destination.trim().is_empty() {
            return Err(ClientError::validation("origin and destination are required"));
        }
        let date = to_local_date_time(departure);
        self.api
            .get_query(
                "/flights/search",
                &[("origin", origin.trim()), ("destination", destination.trim()), ("departureDate", date.as_str())],
            )
            .await
    }

    pub async fn list(&self) -> ClientResult<Vec<Flight>> {
        self.api.get("/flights").await
    }

    pub async fn get(&self, flight_id: &str) -> ClientResult<FlightRequest> {
        self.api.get(&format!("/flights/{}", flight_id)).await
    }

    pub async fn create(&self, flight: &FlightRequest) -> ClientResult<()> {
        validate_flight(flight)?;
        self.api.post_empty("/flights/add", flight).await
    }

    pub async fn update(&self, flight_id: &str, flight: &FlightRequest) -> ClientResult<()> {
        validate_flight(flight)?;
        self.api.put_empty(&format!("/flights/{}", flight_id), flight).await
    }

    pub async fn delete(&self, flight_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/flights/{}", flight_id)).await
    }

    pub async fn airports(&self) -> ClientResult<Vec<Airport>> {
        self.api.get("/airports").await
    }

    pub async fn add_airport(&self, airport: &AirportRequest) -> ClientResult<Airport> {
        if airport.code.trim().is_empty() || airport.name.trim().is_empty() {
            return Err(ClientError::validation("airport name and code are required"));
        }
        self.api.post("/airports", airport).await
    }

    pub async fn update_airport(&self, airport_id: &str, airport: &AirportRequest) -> ClientResult<Airport> {
        self.api.put(&format!("/airports/{}", airport_id), airport).await
    }

    pub async fn delete_airport(&self, airport_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/airports/{}", airport_id)).await
    }

    pub async fn aircraft(&self) -> ClientResult<Vec<Aircraft>> {
        self.api.get("/aircrafts").await
    }

    pub async fn add_aircraft(&self, aircraft: &AircraftRequest) -> ClientResult<Aircraft> {
        if aircraft.model.trim().is_empty() || aircraft.capacity == 0 {
            return Err(ClientError::validation("aircraft model and a positive capacity are required"));
        }
        self.api.post("/aircrafts", aircraft).await
    }

    pub async fn update_aircraft(&self, aircraft_id: &str, aircraft: &AircraftRequest) -> ClientResult<Aircraft> {
        self.api.put(&format!("/aircrafts/{}", aircraft_id), aircraft).await
    }

    pub async fn delete_aircraft(&self, aircraft_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/aircrafts/{}", aircraft_id)).await
    }
}

fn validate_flight(flight: &FlightRequest) -> ClientResult<()> {
    if flight.flight_number.trim().is_empty() {
        return Err(ClientError::validation("flight number is required"));
    }
    if flight.origin_airport_id == flight.destination_airport_id {
        return Err(ClientError::validation("origin and destination must differ"));
    }
    let departure = parse_departure(&flight.departure_time)?;
    let arrival = parse_departure(&flight.arrival_time)?;
    if arrival <= departure {
        return Err(ClientError::validation("arrival must be after departure"));
    }
    if flight.price < 0.0 {
        return Err(ClientError::validation("price cannot be negative"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReservationsService {
    api: ApiClient,
}

impl ReservationsService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> ClientResult<Vec<Reservation>> {
        self.api.get("/reservations").await
    }

    pub async fn for_user(&self, user_id: &str) -> ClientResult<Vec<Reservation>> {
        self.api.get_query(&format!("/reservations/{}", user_id), &[("userId", user_id)]).await
    }

    pub async fn create(&self, request: &ReservationRequest) -> ClientResult<Reservation> {
        validate_reservation(request)?;
        self.api.post("/reservations", request).await
    }

    pub async fn update(&self, reservation_id: &str, request: &ReservationRequest) -> ClientResult<Reservation> {
        validate_reservation(request)?;
        self.api.put(&format!("/reservations/{}", reservation_id), request).await
    }

    pub async fn cancel(&self, reservation_id: &str) -> ClientResult<()> {
        self.api.delete(&format!("/reservations/{}", reservation_id)).await
    }
}

fn validate_reservation(request: &ReservationRequest) -> ClientResult<()> {
    if request.passengers.is_empty() {
        return Err(ClientError::validation("at least one passenger is required"));
    }
    if request.passengers.iter().any(|p| p.name.trim().is_empty()) {
        return Err(ClientError::validation("every passenger needs a name"));
    }
    Ok(())
}
