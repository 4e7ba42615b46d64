pub mod attachments;
pub mod conversations;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod presence;
