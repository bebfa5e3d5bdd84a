//! Prometheus text exposition format.

use std::fmt::Write;

use nodescale_core::ControlMode;

use crate::collector::MetricsReport;

const MODES: [(ControlMode, &str); 4] = [
    (ControlMode::Idle, "idle"),
    (ControlMode::ScalingUp, "scaling_up"),
    (ControlMode::ScalingDown, "scaling_down"),
    (ControlMode::Deploying, "deploying"),
];

/// Render a metrics report in Prometheus text format.
///
/// The average CPU series is omitted while no node has answered.
pub fn render_prometheus(report: &MetricsReport) -> String {
    let mut out = String::new();

    counter(&mut out, "nodescale_ticks_total", "Monitor ticks that ran a probe round.", report.ticks);
    counter(
        &mut out,
        "nodescale_skipped_ticks_total",
        "Monitor ticks skipped (listing failed or round in flight).",
        report.skipped_ticks,
    );
    counter(&mut out, "nodescale_probe_failures_total", "Health probes that failed.", report.probe_failures);
    counter(&mut out, "nodescale_scale_ups_total", "Scale-up operations started.", report.scale_ups);
    counter(&mut out, "nodescale_scale_downs_total", "Scale-down operations started.", report.scale_downs);
    counter(&mut out, "nodescale_deploys_total", "Full-fleet deploys started.", report.deploys);

    gauge(&mut out, "nodescale_nodes", "Nodes known to the controller.", report.nodes);
    gauge(&mut out, "nodescale_ready_nodes", "Nodes that answered the last probe round.", report.ready_nodes);

    out.push_str("# HELP nodescale_average_cpu_percent Mean CPU over ready nodes.\n");
    out.push_str("# TYPE nodescale_average_cpu_percent gauge\n");
    if let Some(cpu) = report.average_cpu {
        let _ = writeln!(out, "nodescale_average_cpu_percent {cpu:.2}");
    }

    out.push_str("# HELP nodescale_control_mode Active control mode (1 for the current mode).\n");
    out.push_str("# TYPE nodescale_control_mode gauge\n");
    for (mode, label) in MODES {
        let value = u8::from(report.mode == mode);
        let _ = writeln!(out, "nodescale_control_mode{{mode=\"{label}\"}} {value}");
    }

    out
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}
