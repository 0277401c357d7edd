//! Parsing, printing, and reparsing every sample program must agree, and
//! dead-block elimination must actually drop the unreferenced block.

use irlower::{analysis, ir};

fn parsed(source: &str) -> ir::Module {
    ir::parse(source).expect("parse")
}

macro_rules! round_trip_test {
    ($name:ident, $file:literal) => {
        #[test]
        fn $name() {
            let source = include_str!(concat!("../demos/", $file));
            let first = parsed(source);
            let printed = ir::print_module(&first);
            let second = parsed(&printed);
            assert_eq!(format!("{first:?}"), format!("{second:?}"));
        }
    };
}

round_trip_test!(select_test_round_trips, "select_test.ir");
round_trip_test!(select_fast_path_test_round_trips, "select_fast_path_test.ir");
round_trip_test!(arith_select_test_round_trips, "arith_select_test.ir");
round_trip_test!(fibonacci_round_trips, "fibonacci.ir");
round_trip_test!(pointer_test_round_trips, "pointer_test.ir");
round_trip_test!(dead_block_test_round_trips, "dead_block_test.ir");

#[test]
fn analysis_drops_the_unreferenced_block() {
    let source = include_str!("../demos/dead_block_test.ir");
    let mut module = parsed(source);
    analysis::analyze(&mut module);

    let main = module.function(irlower::common::id("main")).expect("main");
    assert!(main.block(irlower::common::id(".unused")).is_none());
    assert!(main.block(irlower::common::id(".exit")).is_some());
}
