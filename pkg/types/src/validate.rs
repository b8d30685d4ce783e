use anyhow::{Result, bail};

/// Validate a DNS-1123 label, the rule Kubernetes applies to lease names and namespaces.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Lease timing must leave the holder a positive renewal window.
pub fn validate_lease_timing(duration_secs: u32, grace_secs: u32) -> Result<()> {
    if duration_secs == 0 {
        bail!("lease duration must be greater than zero");
    }
    if duration_secs <= grace_secs {
        bail!(
            "lease duration ({}s) must exceed the grace period ({}s)",
            duration_secs,
            grace_secs
        );
    }
    Ok(())
}
