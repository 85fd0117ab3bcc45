//! Names of the objects owned by a `MyStatefulSet`.
//!
//! All functions are pure. The same inputs always produce the same names,
//! which is what makes pods and claims findable again after a restart.

/// Name of the pod with the given `ordinal`: `{owner}-{ordinal}`.
pub fn instance_name(owner: &str, ordinal: u32) -> String {
    format!("{owner}-{ordinal}")
}

/// Name of the claim created from `claim_template` for the pod with the given
/// `ordinal`: `{claim_template}-{owner}-{ordinal}`.
pub fn claim_name(claim_template: &str, owner: &str, ordinal: u32) -> String {
    claim_name_for_instance(claim_template, &instance_name(owner, ordinal))
}

/// Name of the claim created from `claim_template` for the pod called
/// `instance`. Equal to [`claim_name`] by construction.
pub fn claim_name_for_instance(claim_template: &str, instance: &str) -> String {
    format!("{claim_template}-{instance}")
}

/// Parses the ordinal out of a pod name produced by [`instance_name`].
///
/// Returns [`None`] for names which do not belong to `owner`. Note that an
/// owner called `web` does not claim the pods of an owner called `web-1`,
/// as `web-1-0` has no numeric suffix directly after `web-`.
pub fn ordinal_of(owner: &str, instance: &str) -> Option<u32> {
    let suffix = instance.strip_prefix(owner)?.strip_prefix('-')?;

    // Leading zeros or signs would map two names onto one ordinal
    if suffix.is_empty()
        || !suffix.bytes().all(|b| b.is_ascii_digit())
        || (suffix.len() > 1 && suffix.starts_with('0'))
    {
        return None;
    }

    suffix.parse().ok()
}
