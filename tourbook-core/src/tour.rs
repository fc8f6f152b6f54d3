use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Tour lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TourStatus {
    Active,
    Inactive,
    Completed,
    Cancelled,
}

impl TourStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourStatus::Active => "active",
            TourStatus::Inactive => "inactive",
            TourStatus::Completed => "completed",
            TourStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TourStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TourStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TourStatus::Active),
            "inactive" => Ok(TourStatus::Inactive),
            "completed" => Ok(TourStatus::Completed),
            "cancelled" => Ok(TourStatus::Cancelled),
            other => Err(CoreError::Storage(format!("unknown tour status '{other}'"))),
        }
    }
}

/// A fixed-itinerary package with a set departure date and seat capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    /// Price per person in currency minor units
    pub price: i64,
    pub duration_days: i32,
    pub departure_date: NaiveDate,
    pub total_seats: i32,
    pub remaining_seats: i32,
    pub image_url: Option<String>,
    pub status: TourStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tour {
    /// Seats committed to non-cancelled bookings.
    pub fn held_seats(&self) -> i32 {
        self.total_seats - self.remaining_seats
    }

    pub fn is_bookable(&self) -> bool {
        self.status == TourStatus::Active
    }
}

fn default_total_seats() -> i32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTour {
    pub name: String,
    pub description: Option<String>,
    pub location: String,
    pub price: i64,
    pub duration_days: i32,
    pub departure_date: NaiveDate,
    #[serde(default = "default_total_seats")]
    pub total_seats: i32,
    pub image_url: Option<String>,
}

impl NewTour {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("name is required".into()));
        }
        if self.location.trim().is_empty() {
            return Err(CoreError::Validation("location is required".into()));
        }
        if self.price < 0 {
            return Err(CoreError::Validation("price must not be negative".into()));
        }
        if self.duration_days <= 0 {
            return Err(CoreError::Validation("duration_days must be positive".into()));
        }
        if self.total_seats <= 0 {
            return Err(CoreError::Validation("total_seats must be positive".into()));
        }
        Ok(())
    }

    pub fn into_tour(self, now: DateTime<Utc>) -> Tour {
        Tour {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            location: self.location,
            price: self.price,
            duration_days: self.duration_days,
            departure_date: self.departure_date,
            total_seats: self.total_seats,
            remaining_seats: self.total_seats,
            image_url: self.image_url,
            status: TourStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial admin update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TourPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub price: Option<i64>,
    pub duration_days: Option<i32>,
    pub departure_date: Option<NaiveDate>,
    pub total_seats: Option<i32>,
    pub image_url: Option<String>,
    pub status: Option<TourStatus>,
}

impl TourPatch {
    /// Applies descriptive fields. Capacity is resized separately under the row lock.
    pub fn apply_details(&self, tour: &mut Tour) -> CoreResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(CoreError::Validation("name must not be empty".into()));
            }
            tour.name = name.clone();
        }
        if let Some(description) = &self.description {
            tour.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            if location.trim().is_empty() {
                return Err(CoreError::Validation("location must not be empty".into()));
            }
            tour.location = location.clone();
        }
        if let Some(price) = self.price {
            if price < 0 {
                return Err(CoreError::Validation("price must not be negative".into()));
            }
            tour.price = price;
        }
        if let Some(days) = self.duration_days {
            if days <= 0 {
                return Err(CoreError::Validation("duration_days must be positive".into()));
            }
            tour.duration_days = days;
        }
        if let Some(date) = self.departure_date {
            tour.departure_date = date;
        }
        if let Some(url) = &self.image_url {
            tour.image_url = Some(url.clone());
        }
        if let Some(status) = self.status {
            tour.status = status;
        }
        Ok(())
    }
}

/// Listing window shared by every list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TourFilter {
    pub name: Option<String>,
    pub location: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub duration_days: Option<i32>,
    /// Admin listings see every status; the public catalog only active tours.
    pub include_inactive: bool,
    pub page: Page,
}

impl TourFilter {
    pub fn matches(&self, tour: &Tour) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .map(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
                .unwrap_or(true)
        }

        (self.include_inactive || tour.status == TourStatus::Active)
            && contains(&tour.name, &self.name)
            && contains(&tour.location, &self.location)
            && self.min_price.map(|p| tour.price >= p).unwrap_or(true)
            && self.max_price.map(|p| tour.price <= p).unwrap_or(true)
            && self.duration_days.map(|d| tour.duration_days == d).unwrap_or(true)
    }
}

/// Seat count after releasing `seats` back to a tour.
///
/// Releasing past `total` means an upstream bookkeeping bug. Debug builds
/// panic on it; release builds log and clamp to `total`.
pub fn restore_seats(tour_id: Uuid, remaining: i32, total: i32, seats: i32) -> i32 {
    let restored = remaining.saturating_add(seats);
    if restored > total {
        tracing::error!(
            %tour_id,
            remaining,
            total,
            seats,
            "seat release would exceed tour capacity; clamping"
        );
        debug_assert!(
            restored <= total,
            "tour {tour_id}: releasing {seats} seats onto {remaining}/{total}"
        );
        return total;
    }
    restored
}

/// Remaining seats after changing capacity to `new_total`, keeping held seats held.
pub fn resize_capacity(tour: &Tour, new_total: i32) -> CoreResult<i32> {
    if new_total <= 0 {
        return Err(CoreError::Validation("total_seats must be positive".into()));
    }
    let held = tour.held_seats();
    if new_total < held {
        return Err(CoreError::InsufficientCapacity {
            remaining: tour.remaining_seats,
            requested: tour.total_seats - new_total,
        });
    }
    Ok(new_total - held)
}
