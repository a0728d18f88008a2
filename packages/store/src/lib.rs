pub mod error;
pub mod models;
pub mod page;
pub mod repo;

mod memory;
pub use memory::MemoryStore;

pub use error::{StoreError, StoreResult};
pub use page::{Page, PageRequest};
pub use repo::{
    AnalyticsRepository, BillingRepository, ConversationRepository, JobRepository,
    MentorshipRepository, NotificationRepository, SocialRepository, Store, TokenRepository,
    UserRepository,
};
