//! Quadlet unit file rendering.
//!
//! Services, networks and volumes declared in the host configuration are
//! materialized as `.container`, `.network` and `.volume` quadlet units.
//! Each unit carries labels identifying the managing service and its
//! content hash, which is how running containers are mapped back to
//! declared services during observation.

use std::collections::BTreeMap;

use gitops_sync_common::{hash, Manifest, SectionFields};

/// Label carrying the managed service name on a running container.
pub const SERVICE_LABEL: &str = "gitops-service";

/// Label carrying the content hash of the definition a container runs.
pub const HASH_LABEL: &str = "gitops-hash";

/// Label identifying a managed network unit.
pub const NETWORK_LABEL: &str = "gitops-network";

/// Label identifying a managed volume unit.
pub const VOLUME_LABEL: &str = "gitops-volume";

/// Renders a section's fields as `Field=value` lines in sorted field
/// order, substituting `${KEY}` template references in each value.
pub fn render_fields(fields: &SectionFields, template: &BTreeMap<String, String>) -> String {
    let mut rendered = String::new();
    for (field, values) in fields {
        for value in values {
            let mut value = value.clone();
            for (key, replacement) in template {
                value = value.replace(&format!("${{{key}}}"), replacement);
            }
            rendered.push_str(field);
            rendered.push('=');
            rendered.push_str(&value);
            rendered.push('\n');
        }
    }
    rendered
}

/// Renders the `.container` unit for a service.
pub fn container_unit(
    manifest: &Manifest,
    service: &str,
    content_hash: &str,
    template: &BTreeMap<String, String>,
) -> String {
    let container_fields = render_fields(&manifest.container, template);
    let unit_fields = render_fields(&manifest.unit, template);
    let service_fields = render_fields(&manifest.service, template);

    format!(
        "\n[Install]\nWantedBy=default.target\n\n[Container]\n{container_fields}Label={SERVICE_LABEL}={service}\nLabel={HASH_LABEL}={content_hash}\n\n[Unit]\n{unit_fields}\n[Service]\n{service_fields}"
    )
}

/// Renders the `.network` unit for a shared network.
///
/// The hash label is computed over the rendered fields, so edits to the
/// network definition are visible as drift.
pub fn network_unit(fields: &SectionFields, network: &str) -> String {
    let network_fields = render_fields(fields, &BTreeMap::new());
    let content_hash = hash::sha256_hex(network_fields.as_bytes());

    format!(
        "\n[Network]\n{network_fields}Label={NETWORK_LABEL}={network}\nLabel={HASH_LABEL}={content_hash}\n"
    )
}

/// Renders the `.volume` unit for a shared volume.
pub fn volume_unit(fields: &SectionFields, volume: &str) -> String {
    let volume_fields = render_fields(fields, &BTreeMap::new());
    let content_hash = hash::sha256_hex(volume_fields.as_bytes());

    format!(
        "\n[Volume]\n{volume_fields}Label={VOLUME_LABEL}={volume}\nLabel={HASH_LABEL}={content_hash}\n"
    )
}
