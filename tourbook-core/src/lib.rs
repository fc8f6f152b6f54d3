pub mod billing;
pub mod booking;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod inventory;
pub mod ledger;
pub mod memory;
pub mod payment;
pub mod repository;
pub mod tour;

pub use booking::{Actor, Booking, BookingFilter, BookingStatus, ConfirmVia};
pub use coordinator::{CreateBooking, ReservationCoordinator, Settlement};
pub use error::{CoreError, CoreResult, Entity};
pub use identity::{Caller, Role};
pub use memory::MemoryStore;
pub use payment::{CaptureOutcome, GatewayOrder, MockPaymentGateway, Payment, PaymentGateway, PaymentStatus};
pub use repository::{Locked, ReservationStore, StoreTx};
pub use tour::{NewTour, Page, Tour, TourFilter, TourPatch, TourStatus};
