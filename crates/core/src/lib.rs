pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod locks;
pub mod mentions;
pub mod platform;
pub mod render;
pub mod store;
pub mod threshold;

pub use domain::highlight::{HighlightAuthor, HighlightContent, HighlightField, HighlightRecord};
pub use domain::ids::{ChannelId, CommunityId, MessageId, RoleId, UserId};
pub use domain::member::{MemberProfile, Role};
pub use domain::message::{
    Attachment, MediaKind, MentionedUser, MessageAuthor, MessageReference, ReactionTally,
    SourceMessage,
};
pub use engine::{
    EngineSettings, HighlightEngine, IgnoreReason, ReactionKind, ReactionSignal, SyncOutcome,
};
pub use errors::{ApiError, FetchTarget, PersistenceError, StoreLoadError, SyncError};
pub use mentions::MentionDirectory;
pub use platform::ChatApi;
pub use store::{HighlightStore, StarboardData};
pub use threshold::{HighlightAction, HighlightState, Tier};
