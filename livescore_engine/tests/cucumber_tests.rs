mod cucumber;

use ::cucumber::{writer, World};
use log::*;
use tokio::runtime::Runtime;

use livescore_engine::test_utils::prepare_env::prepare_test_env;

use crate::cucumber::LiveScoreWorld;

fn main() {
    prepare_test_env();
    let sys = Runtime::new().unwrap();
    sys.block_on(LiveScoreWorld::cucumber().with_writer(writer::Libtest::or_basic()).run("tests/features"));
    info!("🚀️ Tests complete");
}
