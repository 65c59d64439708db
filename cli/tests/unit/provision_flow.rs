//! Orchestrator flows against a recording backend and the real rcgen
//! certificate generator.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use shipyard_cli::application::{CertificateGenerator, Orchestrator};
use shipyard_cli::domain::{DriverOptions, InstallPaths, ProvisionerConfig};
use shipyard_cli::infra::certs::RcgenCertificateGenerator;

use crate::mocks::{Recorded, RecordingBackend};

/// Writes a CA and client certificate pair into `certs`.
fn seed_ca(certs: &Path) {
    let ca_key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "shipyard test CA");
    params.distinguished_name = dn;
    let ca = params.self_signed(&ca_key).unwrap();
    std::fs::write(certs.join("ca.pem"), ca.pem()).unwrap();
    std::fs::write(certs.join("ca-key.pem"), ca_key.serialize_pem()).unwrap();
    std::fs::write(certs.join("cert.pem"), "client cert").unwrap();
    std::fs::write(certs.join("key.pem"), "client key").unwrap();
}

fn orchestrator(
    dir: &tempfile::TempDir,
    addresses: &[&str],
) -> Orchestrator<RecordingBackend, RcgenCertificateGenerator> {
    let config = ProvisionerConfig {
        name: "demo".to_string(),
        ..ProvisionerConfig::default()
    };
    let paths = InstallPaths::new(dir.path(), "demo");
    std::fs::create_dir_all(&paths.certs_path).unwrap();
    seed_ca(&paths.certs_path);
    Orchestrator::with_backend(
        &config,
        paths,
        RecordingBackend::with_addresses(addresses),
        RcgenCertificateGenerator,
    )
    .unwrap()
}

#[tokio::test]
async fn test_second_machine_trusts_first_machines_registry() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir, &["10.0.0.5", "10.0.0.9"]);

    let first = orch.provision_machine(&DriverOptions::new()).await.unwrap();
    let second = orch.provision_machine(&DriverOptions::new()).await.unwrap();

    assert_eq!((first.name.as_str(), first.address.as_str()), ("demo-1", "10.0.0.5"));
    assert_eq!((second.name.as_str(), second.address.as_str()), ("demo-2", "10.0.0.9"));

    let cert = orch.paths().certs_path.join("registry-cert.pem");
    let ips = RcgenCertificateGenerator.ip_addresses(&cert).await.unwrap();
    assert_eq!(ips, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);

    let expected = vec![
        "/home/ubuntu/certs/10.0.0.5:5000/registry-cert.pem".to_string(),
        "/home/ubuntu/certs/10.0.0.5:5000/registry-key.pem".to_string(),
        "/etc/docker/certs.d/ca-key.pem".to_string(),
        "/etc/docker/certs.d/ca.pem".to_string(),
        "/etc/docker/certs.d/cert.pem".to_string(),
        "/etc/docker/certs.d/key.pem".to_string(),
    ];
    assert_eq!(orch.backend().remote_copies("demo-1"), expected);
    assert_eq!(orch.backend().remote_copies("demo-2"), expected);
}

#[tokio::test]
async fn test_remote_steps_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir, &["10.0.0.5"]);

    orch.provision_machine(&DriverOptions::new()).await.unwrap();

    let commands: Vec<String> = orch
        .backend()
        .recorded()
        .into_iter()
        .filter_map(|r| match r {
            Recorded::Run { command, .. } => Some(command),
            Recorded::Copy { .. } => None,
        })
        .collect();
    assert_eq!(commands.len(), 5);
    assert_eq!(commands[0], "mkdir -p /home/ubuntu/certs/10.0.0.5:5000");
    assert_eq!(commands[1], "sudo mkdir -p /etc/docker/certs.d");
    assert_eq!(commands[2], "sudo cp -r /home/ubuntu/certs/* /etc/docker/certs.d/");
    assert!(commands[3].ends_with("sudo tee -a /etc/ssl/certs/ca-certificates.crt"));
    assert_eq!(commands[4], "sudo mkdir -p /var/lib/registry/");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fleet_shares_one_registry_identity() {
    let dir = tempfile::tempdir().unwrap();
    let addresses = ["10.0.0.5", "10.0.0.6", "10.0.0.7"];
    let orch = orchestrator(&dir, &addresses);

    let results = orch.provision_fleet(3, &DriverOptions::new()).await;

    assert!(results.iter().all(Result::is_ok));
    let cert = orch.paths().certs_path.join("registry-cert.pem");
    let ips = RcgenCertificateGenerator.ip_addresses(&cert).await.unwrap();
    assert_eq!(ips.len(), 1);
    assert!(addresses.contains(&ips[0].to_string().as_str()));

    let registry_dirs: BTreeSet<String> = ["demo-1", "demo-2", "demo-3"]
        .iter()
        .flat_map(|m| orch.backend().remote_copies(m))
        .filter(|remote| remote.ends_with("/registry-cert.pem"))
        .collect();
    assert_eq!(
        registry_dirs,
        BTreeSet::from([format!("/home/ubuntu/certs/{}:5000/registry-cert.pem", ips[0])])
    );
}

#[tokio::test]
async fn test_bootstrap_unknown_machine_fails() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir, &[]);

    let err = orch.bootstrap_machine("demo-7").await.unwrap_err();

    assert!(err.to_string().contains("demo-7"), "got: {err}");
    assert!(orch.backend().recorded().is_empty());
}

#[tokio::test]
async fn test_failed_key_write_does_not_poison_later_machines() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir, &["10.0.0.5", "10.0.0.9"]);
    let certs = orch.paths().certs_path.clone();
    std::fs::create_dir(certs.join("registry-key.pem")).unwrap();

    let first = orch.provision_machine(&DriverOptions::new()).await.unwrap_err();
    assert_eq!(first.stranded_machine(), Some("demo-1"));
    assert!(!certs.join("registry-cert.pem").exists());

    std::fs::remove_dir(certs.join("registry-key.pem")).unwrap();
    let second = orch.provision_machine(&DriverOptions::new()).await.unwrap();

    assert_eq!(second.address, "10.0.0.9");
    let ips = RcgenCertificateGenerator
        .ip_addresses(&certs.join("registry-cert.pem"))
        .await
        .unwrap();
    assert_eq!(ips, vec!["10.0.0.9".parse::<IpAddr>().unwrap()]);
    assert!(certs.join("registry-key.pem").is_file());
    assert_eq!(orch.backend().remote_copies("demo-2").len(), 6);
}
