//! Node data model for the branch DAG.
//!
//! A [`Node`] is the signed, content-addressed unit every branch chain is
//! made of. Nodes are built and signed by their author (usually through
//! [`NodeBuilder`]) and only read by the engine.
//!
//! # Wire format
//!
//! Nodes serialize to canonical JSON (see [`canonical`]): compact, keys
//! sorted at every level, empty fields omitted. The same bytes are hashed by
//! the content store to produce the node's key, and the same bytes minus the
//! `signature` member are what the author signs.
//!
//! ```text
//! {"address":"1…","branch":"main","branches":["main"],"pubkey":"02…","seq":1,"signature":"…","timestamp":"2026-01-01T00:00:00Z"}
//! ```
//!
//! `pubkey` and `signature` are hex; `data` is standard base64.

pub mod builder;
pub mod canonical;

pub use builder::NodeBuilder;
pub use canonical::{canonicalize_json, to_canonical_bytes};

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::backend::ContentKey;
use crate::error::DagError;
use crate::identity::{self, Keypair};

/// A single signed entry in an address's DAG.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    /// Position within the node's branch chain. The first node of every
    /// branch has seq 1.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: u64,

    /// Author-asserted creation time, RFC3339.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,

    /// Base58Check address of the author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    /// Hex-encoded SEC1 compressed public key of the author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pubkey: String,

    /// The node this one extends. Absent for the address root.
    #[serde(default, skip_serializing_if = "key_is_absent")]
    pub previous: Option<ContentKey>,

    /// Branch this node belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,

    /// Node this node's branch forks from. Absent for the address root.
    #[serde(default, skip_serializing_if = "key_is_absent")]
    pub branch_root: Option<ContentKey>,

    /// Sub-branches this node opens, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,

    /// Opaque author metadata. Signed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    /// Application payload. Signed.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub data: Vec<u8>,

    /// Hex-encoded 64-byte ECDSA signature over [`Node::signable_bytes`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[allow(clippy::ref_option)]
fn key_is_absent(key: &Option<ContentKey>) -> bool {
    key.as_ref().is_none_or(ContentKey::is_empty)
}

impl Node {
    /// The node this one extends, treating an empty key as absent.
    #[must_use]
    pub fn previous_key(&self) -> Option<&ContentKey> {
        self.previous.as_ref().filter(|k| !k.is_empty())
    }

    /// The node this node's branch forks from, treating an empty key as
    /// absent.
    #[must_use]
    pub fn branch_root_key(&self) -> Option<&ContentKey> {
        self.branch_root.as_ref().filter(|k| !k.is_empty())
    }

    /// True for an address root: nothing before it and no fork point.
    #[must_use]
    pub fn is_address_root(&self) -> bool {
        self.previous_key().is_none() && self.branch_root_key().is_none()
    }

    /// Whether this node declares `branch` among the branches it opens.
    #[must_use]
    pub fn opens(&self, branch: &str) -> bool {
        self.branches.iter().any(|b| b == branch)
    }

    /// Canonical bytes covered by the signature: every field except
    /// `signature`.
    ///
    /// # Errors
    ///
    /// [`DagError::Encode`] if the node cannot be represented as JSON.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, DagError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("signature");
        }
        Ok(canonicalize_json(&value)?.into_bytes())
    }

    /// Canonical JSON bytes, as persisted and content-hashed.
    ///
    /// # Errors
    ///
    /// [`DagError::Encode`] if the node cannot be represented as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, DagError> {
        Ok(to_canonical_bytes(self)?)
    }

    /// Parse a node from its JSON form.
    ///
    /// # Errors
    ///
    /// `serde_json::Error` if the bytes are not a node.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Sign the node with `keypair`. Only `signature` changes; `address` and
    /// `pubkey` must already name the same key or verification will fail.
    ///
    /// # Errors
    ///
    /// [`DagError::Encode`] if the signable bytes cannot be produced.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<(), DagError> {
        let payload = self.signable_bytes()?;
        self.signature = hex::encode(keypair.sign(&payload));
        Ok(())
    }

    /// Decoded public key bytes.
    ///
    /// # Errors
    ///
    /// [`DagError::UnableToDecodePubKey`] for malformed hex.
    pub fn pubkey_bytes(&self) -> Result<Vec<u8>, DagError> {
        hex::decode(&self.pubkey).map_err(|e| DagError::UnableToDecodePubKey(e.to_string()))
    }

    /// Verify `signature` against `pubkey` over the signable bytes.
    ///
    /// # Errors
    ///
    /// [`DagError::UnableToDecodePubKey`], [`DagError::UnableToDecodeSignature`]
    /// for malformed inputs; [`DagError::NodeSignatureDoesNotMatch`] when the
    /// signature is well-formed but does not cover this content.
    pub fn verify_signature(&self) -> Result<(), DagError> {
        let pubkey = self.pubkey_bytes()?;
        let signature = hex::decode(&self.signature)
            .map_err(|e| DagError::UnableToDecodeSignature(e.to_string()))?;
        let payload = self.signable_bytes()?;
        identity::verify_signature(&pubkey, &payload, &signature)?;
        Ok(())
    }

    /// Check that `address` is well-formed and derived from `pubkey`.
    ///
    /// # Errors
    ///
    /// [`DagError::InvalidChecksum`], [`DagError::UnableToDecodePubKey`],
    /// [`DagError::AddressDoesNotMatchPubKey`].
    pub fn verify_address(&self) -> Result<(), DagError> {
        identity::verify_address(&self.address)?;
        let pubkey = self.pubkey_bytes()?;
        identity::verify_address_for_pubkey(&self.address, &pubkey)?;
        Ok(())
    }

    /// Parse `timestamp`.
    ///
    /// # Errors
    ///
    /// [`DagError::InvalidNodeTimestamp`] if it is not RFC3339.
    pub fn parsed_timestamp(&self) -> Result<DateTime<FixedOffset>, DagError> {
        DateTime::parse_from_rfc3339(&self.timestamp).map_err(|e| DagError::InvalidNodeTimestamp {
            timestamp: self.timestamp.clone(),
            reason: e.to_string(),
        })
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keypair() -> Keypair {
        Keypair::from_secret_bytes(&[11; 32]).expect("valid scalar")
    }

    fn signed_root(kp: &Keypair) -> Node {
        NodeBuilder::root("main")
            .timestamp("2026-03-01T12:00:00Z")
            .property("kind", "profile")
            .data(b"hello".to_vec())
            .build(kp)
            .expect("build root")
    }

    #[test]
    fn empty_fields_are_omitted() {
        let node = Node {
            seq: 1,
            branch: "main".into(),
            ..Node::default()
        };
        let json = String::from_utf8(node.to_json().expect("json")).expect("utf8");
        assert_eq!(json, r#"{"branch":"main","seq":1}"#);
    }

    #[test]
    fn empty_keys_are_omitted_and_treated_as_absent() {
        let node = Node {
            seq: 1,
            previous: Some(ContentKey::new("")),
            branch_root: Some(ContentKey::new("")),
            ..Node::default()
        };
        let json = String::from_utf8(node.to_json().expect("json")).expect("utf8");
        assert_eq!(json, r#"{"seq":1}"#);
        assert!(node.is_address_root());
    }

    #[test]
    fn json_round_trip_preserves_every_field() {
        let kp = keypair();
        let node = signed_root(&kp);
        let bytes = node.to_json().expect("json");
        let back = Node::from_json(&bytes).expect("parse");
        assert_eq!(back, node);
        assert_eq!(back.to_json().expect("json"), bytes);
    }

    #[test]
    fn data_travels_as_base64() {
        let kp = keypair();
        let json = String::from_utf8(signed_root(&kp).to_json().expect("json")).expect("utf8");
        assert!(json.contains(r#""data":"aGVsbG8=""#));
    }

    #[test]
    fn signable_bytes_exclude_signature() {
        let kp = keypair();
        let node = signed_root(&kp);
        let signable = String::from_utf8(node.signable_bytes().expect("bytes")).expect("utf8");
        assert!(!signable.contains("signature"));

        let mut unsigned = node.clone();
        unsigned.signature.clear();
        assert_eq!(unsigned.signable_bytes().expect("bytes"), node.signable_bytes().expect("bytes"));
    }

    #[test]
    fn signed_node_verifies() {
        let kp = keypair();
        let node = signed_root(&kp);
        node.verify_signature().expect("signature");
        node.verify_address().expect("address");
    }

    #[test]
    fn foreign_signature_does_not_match() {
        let kp = keypair();
        let other = Keypair::from_secret_bytes(&[12; 32]).expect("valid scalar");
        let mut node = signed_root(&kp);
        node.sign(&other).expect("sign");
        assert!(matches!(node.verify_signature(), Err(DagError::NodeSignatureDoesNotMatch)));
    }

    #[test]
    fn malformed_hex_is_a_decode_error() {
        let kp = keypair();
        let mut node = signed_root(&kp);
        node.signature = "zz".into();
        assert!(matches!(node.verify_signature(), Err(DagError::UnableToDecodeSignature(_))));

        let mut node = signed_root(&kp);
        node.pubkey = "not hex".into();
        assert!(matches!(node.verify_signature(), Err(DagError::UnableToDecodePubKey(_))));
    }

    #[test]
    fn missing_signature_is_a_decode_error() {
        let kp = keypair();
        let mut node = signed_root(&kp);
        node.signature.clear();
        assert!(matches!(node.verify_signature(), Err(DagError::UnableToDecodeSignature(_))));
    }

    #[test]
    fn address_of_other_key_is_rejected() {
        let kp = keypair();
        let other = Keypair::from_secret_bytes(&[13; 32]).expect("valid scalar");
        let mut node = signed_root(&kp);
        node.address = other.address().to_owned();
        assert!(matches!(
            node.verify_address(),
            Err(DagError::AddressDoesNotMatchPubKey { .. })
        ));
    }

    #[test]
    fn bad_timestamp_is_reported() {
        let node = Node {
            timestamp: "yesterday".into(),
            ..Node::default()
        };
        assert!(matches!(node.parsed_timestamp(), Err(DagError::InvalidNodeTimestamp { .. })));
    }

    #[derive(Debug, Clone)]
    enum Tamper {
        Seq(u64),
        Branch(String),
        Property(String, String),
        Data(Vec<u8>),
        Timestamp,
        Branches(String),
    }

    fn tamper_strategy() -> impl Strategy<Value = Tamper> {
        prop_oneof![
            (2_u64..1000).prop_map(Tamper::Seq),
            "[a-z]{1,8}".prop_map(Tamper::Branch),
            ("[a-z]{1,6}", "[ -~]{0,10}").prop_map(|(k, v)| Tamper::Property(k, v)),
            proptest::collection::vec(any::<u8>(), 1..32).prop_map(Tamper::Data),
            Just(Tamper::Timestamp),
            "[a-z]{1,8}".prop_map(Tamper::Branches),
        ]
    }

    proptest! {
        #[test]
        fn sign_then_verify_holds_and_tampering_breaks_it(
            props in proptest::collection::btree_map("[a-z]{1,6}", "[ -~]{0,12}", 0..6),
            data in proptest::collection::vec(any::<u8>(), 0..64),
            tamper in tamper_strategy(),
        ) {
            let kp = keypair();
            let mut builder = NodeBuilder::root("main")
                .timestamp("2026-03-01T12:00:00Z")
                .data(data);
            for (k, v) in &props {
                builder = builder.property(k, v);
            }
            let node = builder.build(&kp).expect("build");
            prop_assert!(node.verify_signature().is_ok());

            let mut tampered = node.clone();
            match tamper {
                Tamper::Seq(seq) => tampered.seq = seq,
                Tamper::Branch(b) => tampered.branch = format!("{b}-x"),
                Tamper::Property(k, v) => {
                    let slot = tampered.properties.entry(k).or_default();
                    slot.push_str(&v);
                    slot.push('!');
                }
                Tamper::Data(extra) => tampered.data.extend(extra),
                Tamper::Timestamp => tampered.timestamp = "2026-03-01T12:00:01Z".into(),
                Tamper::Branches(b) => tampered.branches.push(format!("{b}-x")),
            }
            prop_assert!(
                matches!(tampered.verify_signature(), Err(DagError::NodeSignatureDoesNotMatch)),
                "tampered node still verifies"
            );
        }
    }
}
