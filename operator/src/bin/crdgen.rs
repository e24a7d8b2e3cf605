//! Prints the CustomResourceDefinitions for the control plane's
//! objects; deploy tooling pipes this into the cluster.

use kube::CustomResourceExt;

fn main() {
    let session = serde_yaml::to_string(&ambient_types::Session::crd())
        .expect("serialize Session CRD");
    let settings = serde_yaml::to_string(&ambient_types::WorkspaceSettings::crd())
        .expect("serialize WorkspaceSettings CRD");
    print!("{session}---\n{settings}");
}
