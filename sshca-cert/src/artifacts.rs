//! C6: Client Artifact Assembler.
//!
//! Produces the `known_hosts` CA trust line and the `ssh_config` block for a
//! configured host-glob scope, per design doc §4.6. Pure functions: no I/O,
//! no state — the server calls these once per successful issuance and hands
//! the lines straight into the response.

/// `@cert-authority <hostGlob> <caPublicKeyBlob> <caComment>` — exactly one
/// line.
pub fn trust_lines(host_glob: &str, ca_public_key_openssh: &str, ca_comment: &str) -> Vec<String> {
    vec![format!("@cert-authority {host_glob} {ca_public_key_openssh} {ca_comment}")]
}

/// The `ssh_config` block: `Host` header, the `$CERTNAME` placeholders the
/// client resolves locally, then any additional configured lines, each
/// indented. The server never resolves `$CERTNAME` to a real path.
pub fn config_lines(host_glob: &str, additional_lines: &[String]) -> Vec<String> {
    let mut lines = vec![
        format!("Host {host_glob}"),
        "    IdentityFile $CERTNAME".to_string(),
        "    CertificateFile $CERTNAME-cert.pub".to_string(),
    ];
    lines.extend(additional_lines.iter().map(|line| format!("    {line}")));
    lines
}
