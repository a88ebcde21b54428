// AI job queue: typed inputs and prompts, the queue itself, the processor
// that runs jobs against the AI provider, and the background worker.
// All provider calls go through llm_client.

pub mod handlers;
pub mod input;
pub mod processor;
pub mod prompts;
pub mod queue;
pub mod store;
pub mod tone;
pub mod worker;
