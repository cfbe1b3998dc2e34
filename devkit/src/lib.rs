/*!
# AVD DevKit - Stubs and utilities for development

Lets conversion pipelines run in tests without ffmpeg, powermetrics or
real hardware sensors:
- Scripted command runner (records every invocation)
- Scripted telemetry source
- Recording structured log sink
- Temporary-directory test harness
*/

pub mod runner_stub;
pub mod sink_stub;
pub mod telemetry_stub;
pub mod test_utils;

pub use runner_stub::{RecordedCall, ScriptedRunner};
pub use sink_stub::RecordingSink;
pub use telemetry_stub::ScriptedTelemetry;
pub use test_utils::TestHarness;
