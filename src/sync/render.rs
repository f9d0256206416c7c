//! Rendering of reference data into consumer config files

use crate::config::settings::ArtifactFormat;
use crate::error::{StackError, StackResult};

use super::fetch::{Cidr, ReferenceData};

const HEADER: &str = "# Generated by stackward sync; manual edits are overwritten.";

/// nftables set names defined by the allow-list
pub const NFT_V4_SET: &str = "upstream_ipv4";
pub const NFT_V6_SET: &str = "upstream_ipv6";

/// Render `data` in the given format
///
/// The output depends only on the networks and sources, so rendering the
/// same data twice gives byte-identical files.
pub fn render(format: ArtifactFormat, data: &ReferenceData) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(&format!("# Sources: {}\n", data.sources.join(" ")));

    match format {
        ArtifactFormat::TrustedProxies => {
            let networks: Vec<String> = data.networks.iter().map(Cidr::to_string).collect();
            out.push_str("trusted_proxies static ");
            out.push_str(&networks.join(" "));
            out.push('\n');
        }
        ArtifactFormat::AllowList => {
            render_nft_define(&mut out, NFT_V4_SET, data.v4());
            render_nft_define(&mut out, NFT_V6_SET, data.v6());
        }
    }
    out
}

fn render_nft_define<'a>(out: &mut String, name: &str, networks: impl Iterator<Item = &'a Cidr>) {
    let networks: Vec<String> = networks.map(Cidr::to_string).collect();
    if networks.is_empty() {
        out.push_str(&format!("# {}: no networks published\n", name));
        return;
    }
    out.push_str(&format!("define {} = {{\n", name));
    for (i, network) in networks.iter().enumerate() {
        let sep = if i + 1 < networks.len() { "," } else { "" };
        out.push_str(&format!("\t{}{}\n", network, sep));
    }
    out.push_str("}\n");
}

/// Check a rendered file before it may be activated
pub fn validate(format: ArtifactFormat, content: &str) -> StackResult<()> {
    let body: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    let networks = match format {
        ArtifactFormat::TrustedProxies => {
            if body.len() != 1 {
                return Err(StackError::Validation(format!(
                    "trusted proxies snippet must be one directive, found {} lines",
                    body.len()
                )));
            }
            let rest = body[0]
                .strip_prefix("trusted_proxies static ")
                .ok_or_else(|| {
                    StackError::Validation("snippet must start with 'trusted_proxies static'".into())
                })?;
            parse_all(rest.split_whitespace())?
        }
        ArtifactFormat::AllowList => {
            let mut count = 0;
            let mut open = false;
            for line in &body {
                if let Some(rest) = line.strip_prefix("define ") {
                    if open || !rest.ends_with("= {") {
                        return Err(StackError::Validation(format!(
                            "malformed define line '{}'",
                            line
                        )));
                    }
                    open = true;
                } else if *line == "}" {
                    if !open {
                        return Err(StackError::Validation("unbalanced '}'".into()));
                    }
                    open = false;
                } else if open {
                    count += parse_all(std::iter::once(line.trim_end_matches(',')))?;
                } else {
                    return Err(StackError::Validation(format!(
                        "unexpected line '{}' outside a set",
                        line
                    )));
                }
            }
            if open {
                return Err(StackError::Validation("unterminated set definition".into()));
            }
            count
        }
    };

    if networks == 0 {
        return Err(StackError::Validation("rendered file lists no networks".into()));
    }
    Ok(())
}

fn parse_all<'a>(tokens: impl Iterator<Item = &'a str>) -> StackResult<usize> {
    let mut count = 0;
    for token in tokens {
        token
            .parse::<Cidr>()
            .map_err(|_| StackError::Validation(format!("'{}' is not a CIDR block", token)))?;
        count += 1;
    }
    Ok(count)
}
