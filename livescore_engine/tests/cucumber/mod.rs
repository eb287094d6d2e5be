mod job_steps;
mod match_steps;
mod world;

pub use world::LiveScoreWorld;
