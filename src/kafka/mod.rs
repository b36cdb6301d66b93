pub mod producer;
pub mod topic_manager;

#[cfg(test)]
mod tests;

pub use producer::KafkaBroker;
pub use topic_manager::TopicManager;
