pub mod credential;
pub mod record;
pub mod run;
pub mod task;
