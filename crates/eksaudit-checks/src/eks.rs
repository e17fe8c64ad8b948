//! Built-in CIS Amazon EKS benchmark controls
//!
//! Worker-node controls inspect the kubelet: ownership and permissions of
//! its kubeconfig and config file, and selected kubelet settings read from
//! the config file, the service command line, or the live `configz`
//! endpoint exposed through `kubectl proxy`. Cluster-policy controls have no
//! automated check and are reported for manual review.

use eksaudit_common::InputDecl;
use eksaudit_core::{
    Assertion, CheckPlan, ComplianceTags, CompositeMode, Control, FactSelector, Normalize,
    Precondition, Probe, Strategy, Subject,
};

pub const KUBELET_SERVICE: &str = "kubelet";

/// `GET` endpoint serving the live kubelet configuration
pub const CONFIGZ_URL: &str =
    "http://{proxy_hostname}:{proxy_port}/api/v1/nodes/{node_name}/proxy/configz";

const RESTART_KUBELET: &str = "Based on your system, restart the kubelet service and check status:

    systemctl daemon-reload
    systemctl restart kubelet.service
    systemctl status kubelet -l";

/// Inputs consumed by the built-in controls; all default to the empty string
pub fn input_declarations() -> Vec<InputDecl> {
    vec![
        InputDecl::string("kubeconfig", "Path of the kubelet kubeconfig file"),
        InputDecl::string("kubelet_config", "Path of the kubelet config file passed with --config"),
        InputDecl::string("node_name", "Node whose live kubelet configuration is queried"),
        InputDecl::string("proxy_hostname", "Host of a running `kubectl proxy`"),
        InputDecl::string("proxy_port", "Port of a running `kubectl proxy`"),
    ]
}

/// Every built-in control, ordered by id
pub fn builtin_controls() -> Vec<Control> {
    vec![
        kubeconfig_ownership(),
        kubelet_config_permissions(),
        kubelet_config_ownership(),
        kubelet_client_certificates(),
        read_only_port(),
        streaming_idle_timeout(),
        restrict_pod_creation(),
        minimize_capabilities(),
    ]
}

fn tags(nist: &[&str], cis_controls: &[&str], cis_rid: &str, level: u8) -> ComplianceTags {
    ComplianceTags::new()
        .with("nist", nist.iter().copied())
        .with("cis_controls", cis_controls.iter().copied())
        .with("cis_rid", [cis_rid])
        .with_cis_level(level)
}

fn root_owned(path: &str) -> Vec<Probe> {
    let selector = FactSelector::FileOwnership { path: path.into() };
    vec![
        Probe::new(selector.clone(), Assertion::equals(Subject::Owner, "root")),
        Probe::new(selector, Assertion::equals(Subject::Group, "root")),
    ]
}

fn kubeconfig_ownership() -> Control {
    Control::new(
        "eks-cis-3.1.2",
        "If kubelet is running, ensure that the file ownership of its kubeconfig file is set to root:root",
        0.5,
    )
    .with_rationale(
        "The kubeconfig file for kubelet controls various parameters for the kubelet service \
         in the worker node. You should set its file ownership to maintain the integrity of \
         the file. The file should be owned by root:root.",
    )
    .with_check_text(
        "Check that the kubelet service is running (`systemctl status kubelet`), locate the \
         kubeconfig passed with --kubeconfig (`ps -ef | grep kubelet`), then run \
         `stat -c %U:%G <kubeconfig>` and verify the ownership is root:root.",
    )
    .with_fix_text("Run `chown root:root <kubeconfig file>` on each worker node.")
    .with_tags(tags(&["CM-6", "Rev_4"], &["5.1", "Rev_6"], "3.1.2", 1))
    .with_plan(
        CheckPlan::new()
            .precondition(Precondition::ServiceRunning(KUBELET_SERVICE.into()))
            .precondition(Precondition::InputSet("kubeconfig".into()))
            .strategy(Strategy::new("kubeconfig", CompositeMode::All).with_probes(root_owned("{kubeconfig}"))),
    )
}

fn kubelet_config_permissions() -> Control {
    Control::new(
        "eks-cis-3.1.3",
        "Ensure that the kubelet configuration file has permissions set to 644 or more restrictive",
        0.5,
    )
    .with_description(
        "Ensure that if the kubelet refers to a configuration file with the --config argument, \
         that file has permissions of 644 or more restrictive.",
    )
    .with_rationale(
        "The kubelet reads various parameters, including security settings, from a config file \
         specified by the --config argument. If this file is specified you should restrict its \
         file permissions to maintain the integrity of the file. The file should be writable \
         by only the administrators on the system.",
    )
    .with_check_text(
        "Locate the config file passed with --config (`ps -ef | grep kubelet`), run \
         `stat -c %a <config file>` and verify the permissions are 644 or more restrictive.",
    )
    .with_fix_text("Run `chmod 644 /etc/kubernetes/kubelet/kubelet-config.json`.")
    .with_tags(tags(&["AC-6 (9)", "CM-2"], &["5.1", "Rev_6", "5.2", "Rev_7"], "3.1.3", 1))
    .with_plan(
        CheckPlan::new().strategy(
            Strategy::new("config-file", CompositeMode::AnyOf)
                .requires(Precondition::InputSet("kubelet_config".into()))
                .probe(Probe::new(
                    FactSelector::FileExists {
                        path: "{kubelet_config}".into(),
                    },
                    Assertion::not_exists(Subject::Value),
                ))
                .probe(
                    Probe::new(
                        FactSelector::FileMode {
                            path: "{kubelet_config}".into(),
                        },
                        Assertion::no_more_permissive_than(0o644),
                    )
                    .optional(),
                ),
        ),
    )
}

fn kubelet_config_ownership() -> Control {
    Control::new(
        "eks-cis-3.1.4",
        "Ensure that the kubelet configuration file ownership is set to root:root",
        0.5,
    )
    .with_description(
        "Ensure that if the kubelet refers to a configuration file with the --config argument, \
         that file is owned by root:root.",
    )
    .with_rationale(
        "The kubelet reads various parameters, including security settings, from a config file \
         specified by the --config argument. If this file is specified you should restrict its \
         file permissions to maintain the integrity of the file. The file should be writable \
         by only the administrators on the system.",
    )
    .with_check_text(
        "Check that the kubelet service is running, locate the config file passed with \
         --config, run `stat -c %U:%G <config file>` and verify the ownership is root:root.",
    )
    .with_fix_text("Run `chown root:root /etc/kubernetes/kubelet/kubelet-config.json`.")
    .with_tags(tags(&["CM-6", "Rev_4"], &["5.1", "Rev_6"], "3.1.4", 1))
    .with_plan(
        CheckPlan::new()
            .precondition(Precondition::ServiceRunning(KUBELET_SERVICE.into()))
            .precondition(Precondition::InputSet("kubelet_config".into()))
            .strategy(
                Strategy::new("config-file", CompositeMode::All)
                    .with_probes(root_owned("{kubelet_config}")),
            ),
    )
}

fn kubelet_client_certificates() -> Control {
    Control::new("eks-cis-3.2.3", "Enable Kubelet authentication using certificates", 0.5)
        .with_rationale(
            "The connections from the apiserver to the kubelet are used for fetching logs for \
             pods, attaching to running pods, and using the kubelet's port-forwarding \
             functionality. These connections terminate at the kubelet's HTTPS endpoint. By \
             default, the apiserver does not verify the kubelet's serving certificate, which \
             makes the connection subject to man-in-the-middle attacks. Enabling Kubelet \
             certificate authentication ensures that the apiserver could authenticate the \
             Kubelet before submitting any requests.",
        )
        .with_check_text(
            "Verify that the kubelet config file sets authentication.x509.clientCAFile to the \
             client certificate authority file, or query the configz endpoint through \
             `kubectl proxy` and inspect the same setting in the live configuration.",
        )
        .with_fix_text(format!(
            "Set authentication.x509.clientCAFile in the kubelet config file, or add \
             --client-ca-file=<path/to/client-ca-file> to KUBELET_ARGS in \
             /etc/systemd/system/kubelet.service.d/10-kubelet-args.conf. {}",
            RESTART_KUBELET
        ))
        .with_tags(tags(&["AC-4", "Rev_4"], &["14.2", "Rev_6"], "3.2.3", 1))
}

fn read_only_port() -> Control {
    let expect_zero = || Assertion::equals(Subject::Value, "0");

    Control::new("eks-cis-3.2.4", "Ensure that the --read-only-port is secured", 0.5)
        .with_description("Disable the read-only port.")
        .with_rationale(
            "The Kubelet process provides a read-only API in addition to the main Kubelet API. \
             Unauthenticated access is provided to this read-only API which could possibly \
             retrieve potentially sensitive information about the cluster.",
        )
        .with_check_text(
            "Open the kubelet config file passed with --config and check that readOnlyPort, if \
             present, is set to 0. Without a config file, check the live configuration from the \
             configz endpoint.",
        )
        .with_fix_text(format!(
            "Set readOnlyPort to 0 in the kubelet config file, or add --read-only-port=0 to \
             KUBELET_ARGS in /etc/systemd/system/kubelet.service.d/10-kubelet-args.conf. {}",
            RESTART_KUBELET
        ))
        .with_tags(tags(&["CM-8", "Rev_4"], &["9.1", "Rev_6"], "3.2.4", 1))
        .with_plan(
            CheckPlan::new()
                .strategy(
                    Strategy::new("config-file", CompositeMode::All)
                        .requires(Precondition::InputSet("kubelet_config".into()))
                        .probe(Probe::new(
                            FactSelector::ConfigValue {
                                path: "{kubelet_config}".into(),
                                key: vec!["readOnlyPort".into()],
                            },
                            expect_zero(),
                        )),
                )
                .strategy(
                    Strategy::new("configz-api", CompositeMode::All)
                        .requires(Precondition::InputSet("node_name".into()))
                        .requires(Precondition::InputSet("proxy_hostname".into()))
                        .requires(Precondition::InputSet("proxy_port".into()))
                        .probe(Probe::new(
                            FactSelector::HttpJson {
                                url: CONFIGZ_URL.into(),
                                key: vec!["kubeletconfig".into(), "readOnlyPort".into()],
                            },
                            expect_zero(),
                        )),
                ),
        )
}

fn streaming_idle_timeout() -> Control {
    const FLAG: &str = "--streaming-connection-idle-timeout";

    let not_zero = || Assertion::not_equals(Subject::Value, "0s").normalized(Normalize::Duration);
    let service_flag = || {
        Probe::new(
            FactSelector::ServiceArgs {
                service: KUBELET_SERVICE.into(),
            },
            Assertion::not_equals(Subject::Flag(FLAG.into()), "0s").normalized(Normalize::Duration),
        )
        .optional()
    };

    Control::new(
        "eks-cis-3.2.5",
        "Ensure that the --streaming-connection-idle-timeout argument is not set to 0",
        0.5,
    )
    .with_description("Do not disable timeouts on streaming connections.")
    .with_rationale(
        "Setting idle timeouts ensures that you are protected against Denial-of-Service \
         attacks, inactive connections and running out of ephemeral ports. By default, \
         --streaming-connection-idle-timeout is set to 4 hours which might be too high for \
         your environment.",
    )
    .with_check_text(
        "Check that streamingConnectionIdleTimeout in the kubelet config file, or the \
         --streaming-connection-idle-timeout argument of the kubelet service, is not set to 0.",
    )
    .with_fix_text(format!(
        "Set streamingConnectionIdleTimeout to a non-zero value in the format #h#m#s in the \
         kubelet config file, or add --streaming-connection-idle-timeout=4h0m0s to \
         KUBELET_ARGS. {}",
        RESTART_KUBELET
    ))
    .with_tags(tags(&["SC-7", "Rev_4"], &["9", "Rev_6"], "3.2.5", 1))
    .with_plan(
        CheckPlan::new()
            .precondition(Precondition::ServiceRunning(KUBELET_SERVICE.into()))
            .strategy(
                Strategy::new("config-file-or-flags", CompositeMode::AnyOf)
                    .requires(Precondition::InputSet("kubelet_config".into()))
                    .probe(
                        Probe::new(
                            FactSelector::ConfigValue {
                                path: "{kubelet_config}".into(),
                                key: vec!["streamingConnectionIdleTimeout".into()],
                            },
                            not_zero(),
                        )
                        .optional(),
                    )
                    .probe(service_flag()),
            )
            .strategy(Strategy::new("service-flags", CompositeMode::AnyOf).probe(service_flag())),
    )
}

fn restrict_pod_creation() -> Control {
    Control::new("eks-cis-4.1.4", "Minimize access to create pods", 0.5)
        .with_description(
            "The ability to create pods in a namespace can provide a number of opportunities \
             for privilege escalation, such as assigning privileged service accounts to these \
             pods or mounting hostPaths with access to sensitive data. Access to create new \
             pods should be restricted to the smallest possible group of users.",
        )
        .with_rationale(
            "The ability to create pods in a cluster opens up possibilities for privilege \
             escalation and should be restricted, where possible.",
        )
        .with_check_text("Review the users who have create access to pod objects in the Kubernetes API.")
        .with_fix_text("Where possible, remove create access to pod objects in the cluster.")
        .with_tags(tags(&["CM-6", "Rev_4"], &["5.1", "Rev_6"], "4.1.4", 1))
}

fn minimize_capabilities() -> Control {
    Control::new("eks-cis-4.2.9", "Minimize the admission of containers with capabilities assigned", 0.7)
        .with_description("Do not generally permit containers with capabilities.")
        .with_rationale(
            "Containers run with a default set of capabilities as assigned by the Container \
             Runtime. In many cases applications running in containers do not require any \
             capabilities to operate, so from the perspective of the principle of least \
             privilege use of capabilities should be minimized.",
        )
        .with_check_text(
            "List the PSPs with `kubectl get psp` and, for each, check whether capabilities \
             have been forbidden: `kubectl get psp <name> -o=jsonpath='{.spec.requiredDropCapabilities}'`.",
        )
        .with_fix_text(
            "Where a namespace contains applications which do not require any Linux \
             capabilities, add a PSP which forbids the admission of containers which do not \
             drop all capabilities.",
        )
        .with_tags(tags(&["CM-6", "Rev_4"], &["5.1", "Rev_6"], "4.2.9", 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eksaudit_core::{CheckProcedure, Severity};
    use std::collections::HashSet;

    #[test]
    fn test_bundle_ids_unique_and_sorted() {
        let controls = builtin_controls();
        let ids: Vec<_> = controls.iter().map(|c| c.id.as_str()).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn test_metadata() {
        for control in builtin_controls() {
            assert!(!control.title.is_empty());
            assert!(!control.rationale.is_empty(), "{} has no rationale", control.id);
            assert!(control.tags.has_framework("nist"));
            assert_eq!(
                control.tags.sections("cis_rid"),
                [control.id.trim_start_matches("eks-cis-").to_string()]
            );
        }

        let capabilities = minimize_capabilities();
        assert_eq!(capabilities.severity, Severity::High);
        assert_eq!(capabilities.tags.cis_level, Some(2));
    }

    #[test]
    fn test_manual_controls() {
        let manual: Vec<_> = builtin_controls()
            .into_iter()
            .filter(|c| matches!(c.check, CheckProcedure::Manual))
            .map(|c| c.id)
            .collect();
        assert_eq!(manual, vec!["eks-cis-3.2.3", "eks-cis-4.1.4", "eks-cis-4.2.9"]);
    }

    #[test]
    fn test_read_only_port_fallback_order() {
        let CheckProcedure::Automated(plan) = read_only_port().check else {
            panic!("expected automated check");
        };
        let names: Vec<_> = plan.strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["config-file", "configz-api"]);
        assert_eq!(plan.strategies[1].requires.len(), 3);
    }

    #[test]
    fn test_placeholders_are_declared_inputs() {
        let declared: HashSet<String> = input_declarations().into_iter().map(|d| d.name).collect();

        for control in builtin_controls() {
            let CheckProcedure::Automated(plan) = &control.check else {
                continue;
            };
            for probe in plan.strategies.iter().flat_map(|s| &s.probes) {
                let rendered = probe.selector.render(|name| {
                    assert!(declared.contains(name), "{} uses undeclared input {}", control.id, name);
                    Some("x".to_string())
                });
                assert!(rendered.is_ok());
            }
        }
    }
}
