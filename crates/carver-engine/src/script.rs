//! Output-script classification.
//!
//! Pure functions mapping a vout's script to an accounting label. Scripts
//! that decode to no address are routed to the shared `UNKNOWN` label so
//! their value stays on the books instead of being dropped.

use carver_core::types::UNKNOWN_LABEL;

use crate::rpc::{RpcScriptPubKey, RpcVout};

/// The label credited by a spendable output: its first decoded address, or
/// `UNKNOWN` for scripts the node could not decode.
pub fn output_label(script: &RpcScriptPubKey) -> String {
    script
        .addresses
        .as_ref()
        .and_then(|addrs| addrs.first())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

/// Zerocoin mint outputs lock value into the accumulator rather than paying
/// an address.
pub fn is_zerocoin_mint(script: &RpcScriptPubKey) -> bool {
    script.script_type.as_deref() == Some("zerocoinmint")
}

/// An empty marker output: zero value and no decodable address. The first
/// vout of a proof-of-stake transaction has this shape.
pub fn is_empty_output(vout: &RpcVout) -> bool {
    vout.value == 0.0
        && vout
            .script_pub_key
            .addresses
            .as_ref()
            .map_or(true, |a| a.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(addresses: Option<Vec<&str>>, script_type: Option<&str>) -> RpcScriptPubKey {
        RpcScriptPubKey {
            addresses: addresses.map(|a| a.into_iter().map(String::from).collect()),
            script_type: script_type.map(String::from),
        }
    }

    #[test]
    fn first_address_wins() {
        let s = script(Some(vec!["SAbc", "SDef"]), Some("pubkeyhash"));
        assert_eq!(output_label(&s), "SAbc");
    }

    #[test]
    fn undecodable_script_goes_to_unknown() {
        assert_eq!(output_label(&script(None, Some("nonstandard"))), UNKNOWN_LABEL);
        assert_eq!(output_label(&script(Some(vec![]), None)), UNKNOWN_LABEL);
    }

    #[test]
    fn zerocoin_mint_detection() {
        assert!(is_zerocoin_mint(&script(None, Some("zerocoinmint"))));
        assert!(!is_zerocoin_mint(&script(None, Some("pubkeyhash"))));
    }

    #[test]
    fn pos_marker_output_is_empty() {
        let marker = RpcVout {
            value: 0.0,
            n: 0,
            script_pub_key: script(None, Some("nonstandard")),
        };
        assert!(is_empty_output(&marker));

        let paying = RpcVout {
            value: 1.0,
            n: 1,
            script_pub_key: script(Some(vec!["SAbc"]), Some("pubkeyhash")),
        };
        assert!(!is_empty_output(&paying));
    }
}
