pub mod campaign;
pub mod donation;
pub mod donor;
pub mod stream_event;
pub mod withdrawal;

pub use campaign::{Campaign, CampaignStatus};
pub use donation::{Donation, DonationStatus, NewConfirmedDonation, NewPendingDonation};
pub use donor::DonorAggregate;
pub use stream_event::RawStreamEvent;
pub use withdrawal::{Withdrawal, WithdrawalStatus};
