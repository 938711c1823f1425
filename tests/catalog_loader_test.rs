//! Startup catalog loading from descriptor trees

mod support;

use forgeline::catalog::{load_catalog, InMemoryRepository, Repository};
use std::fs;
use std::path::Path;
use support::test_config;
use tempfile::TempDir;

const AGENT: &str = r#"{
    "Name": "Marauder",
    "Guid": "5a8f2c1e",
    "Authors": ["alice"],
    "BuildCommand": "dotnet build -c Release",
    "BuildLocation": "bin/Release/Marauder.exe",
    "Architectures": [{"Name": "x64"}],
    "OperatingSystems": [{"Name": "Windows"}],
    "Formats": [{"Name": "Exe"}, {"Name": "Shellcode", "BuildCommand": "./donut.sh PAYLOADNAME", "BuildLocation": "out.bin"}],
    "Versions": [{"Name": "NET45"}],
    "Configurations": [{"Name": "Debug"}, {"Name": "Release"}],
    "AgentTransportTypes": [
        {"Name": "HTTP", "TransportTypeGuid": "http-guid", "BuildCommand": "dotnet build Http", "BuildLocation": "Http/bin/Http.dll"}
    ],
    "Commands": [
        {"Name": "ls", "Description": "List a directory", "Help": "ls <path>", "OpsecSafe": true,
         "Parameters": [{"Name": "path", "Help": "Directory", "Required": false, "Position": 0}]}
    ]
}"#;

const MODULE: &str = r#"{
    "Name": "recon",
    "Description": "Host reconnaissance",
    "Authors": ["bob", "carol"],
    "BuildCommand": "dotnet build Recon",
    "BuildLocation": "Recon/bin/Recon.dll",
    "Commands": [
        {"Name": "whoami", "Artifacts": ["user", "host"]},
        {"Name": "netstat", "MitreReference": "T1049", "Parameters": [{"Name": "all", "Values": ["true", "false"]}]}
    ]
}"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn descriptor_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agents/Marauder/BuildAgent.dotnet.json", AGENT);
    write(dir.path(), "agents/Other/BuildAgent.go.json", AGENT);
    write(dir.path(), "modules/dotnet/Recon/BuildModule.dotnet.json", MODULE);
    write(dir.path(), "modules/go/Recon/BuildModule.go.json", MODULE);
    dir
}

#[tokio::test]
async fn test_load_imports_only_configured_language() {
    let dir = descriptor_tree();
    let config = test_config(dir.path());
    let repo = InMemoryRepository::new();

    let summary = load_catalog(&repo, &config).await.unwrap();

    assert_eq!(summary.agents_imported, 1);
    assert_eq!(summary.modules_imported, 1);
    assert_eq!(summary.invalid, 0);

    let counts = repo.row_counts();
    assert_eq!(counts.languages, 1);
    assert_eq!(counts.agent_types, 1);
    assert_eq!(counts.variants, 7);
    assert_eq!(counts.agent_transport_types, 1);
    assert_eq!(counts.modules, 1);
    assert_eq!(counts.commands, 3);
    assert_eq!(counts.command_parameters, 2);

    let module = repo.find_module("recon", "dotnet").await.unwrap().unwrap();
    assert_eq!(module.authors, "bob, carol");
    assert_eq!(module.language_id, summary.language_id);
    assert_eq!(module.build_location, "Recon/bin/Recon.dll");
}

#[tokio::test]
async fn test_reloading_leaves_row_counts_unchanged() {
    let dir = descriptor_tree();
    let config = test_config(dir.path());
    let repo = InMemoryRepository::new();

    let first = load_catalog(&repo, &config).await.unwrap();
    let after_first = repo.row_counts();
    let second = load_catalog(&repo, &config).await.unwrap();

    assert_eq!(repo.row_counts(), after_first);
    assert_eq!(first.language_id, second.language_id);
    assert_eq!(second.agents_imported, 0);
    assert_eq!(second.agents_skipped, 1);
    assert_eq!(second.modules_imported, 0);
    assert_eq!(second.modules_skipped, 1);
}

#[tokio::test]
async fn test_transport_type_is_found_by_guid() {
    let dir = descriptor_tree();
    let config = test_config(dir.path());
    let repo = InMemoryRepository::new();
    load_catalog(&repo, &config).await.unwrap();

    let agent = repo.find_agent_type("Marauder").await.unwrap().unwrap();
    let transport_type = repo
        .find_agent_transport_type(agent.id, "http-guid")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(transport_type.name, "HTTP");
    assert_eq!(transport_type.build_location, "Http/bin/Http.dll");
    assert!(repo
        .find_agent_transport_type(agent.id, "smb-guid")
        .await
        .unwrap()
        .is_none());
}
