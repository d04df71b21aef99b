use concierge_agent::{Module, OpenRouterClient};
use concierge_core::config::{AppConfig, LoadOptions};
use concierge_modules::{builtin_registry, module_context};
use serde::Serialize;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration validated"));
            checks.extend(check_modules(&config));
            checks.push(check_llm_client(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["module_registry", "active_module", "llm_client"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_modules(config: &AppConfig) -> Vec<DoctorCheck> {
    let registry = match builtin_registry(module_context(&config.assistant)) {
        Ok(registry) => registry,
        Err(error) => {
            return vec![
                DoctorCheck::fail("module_registry", error.to_string()),
                DoctorCheck::skipped("active_module", "the module registry did not build"),
            ];
        }
    };

    let registry_check = DoctorCheck::pass(
        "module_registry",
        format!("{} modules registered: {}", registry.len(), registry.names().join(", ")),
    );
    let active_check = match registry.resolve_active(&config.assistant.module_selector()) {
        Ok(module) => DoctorCheck::pass(
            "active_module",
            format!("`{}` exposes {} functions", module.name(), module.functions().len()),
        ),
        Err(error) => DoctorCheck::fail("active_module", error.to_string()),
    };

    vec![registry_check, active_check]
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match OpenRouterClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_client",
            format!(
                "{} client for model `{}` at {}",
                config.llm.provider.as_str(),
                client.model(),
                client.base_url()
            ),
        ),
        Err(error) => DoctorCheck::fail("llm_client", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
