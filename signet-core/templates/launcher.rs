//! Generated by signet. Verifies the script's signature table, then runs it.

use signet_core::launcher::{run_main, EmbeddedSignature};

const SCRIPT: &str = "";
const SIGS: &[EmbeddedSignature] = &[];
const TAMPER: u8 = 2;

fn main() {
    std::process::exit(run_main(SCRIPT, SIGS, TAMPER));
}
