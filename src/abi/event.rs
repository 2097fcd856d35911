//! Event-log decoding against a known ABI event schema
//!
//! Events emit `(address, topics, data)`. Decoding recovers the indexed
//! values from topics and the non-indexed values from the ABI-encoded data
//! section, then merges them back into source declaration order, producing a
//! named record tagged with the event name and the emitter address.

use std::collections::HashMap;

use alloy::primitives::{keccak256, Address, B256};

use crate::abi::codec::{abi_decode, abi_decode_value};
use crate::abi::function::{AbiEntry, AbiParam};
use crate::abi::value::AbiValue;
use crate::errors::DecodeError;
use crate::types::RawLogEntry;

/// A decoded event: emitter, event name and fields in declaration order
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedEvent {
    pub address: Address,
    pub name: String,
    pub fields: Vec<(String, AbiValue)>,
}

impl DecodedEvent {
    /// Look up a field value by name
    pub fn field(&self, name: &str) -> Option<&AbiValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

impl std::fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}(address={}, {})",
            self.name,
            self.address.to_checksum(None),
            fields
        )
    }
}

/// The topic-0 hash of an event entry, `keccak256("Name(t1,...,tn)")`
pub fn event_topic(entry: &AbiEntry) -> B256 {
    let name = entry.name.as_deref().unwrap_or_default();
    let types = entry
        .inputs
        .iter()
        .map(AbiParam::canonical_type)
        .collect::<Vec<_>>()
        .join(",");
    keccak256(format!("{name}({types})").as_bytes())
}

/// Build the topic-hash index for a full ABI list
pub fn events_by_topic(abi: &[AbiEntry]) -> HashMap<B256, AbiEntry> {
    abi.iter()
        .filter(|entry| entry.is_event())
        .map(|entry| (event_topic(entry), entry.clone()))
        .collect()
}

/// Decode one raw log entry against the emitter's event schemas
///
/// Indexed inputs are pulled from `topics[1..]` (each one word); the rest
/// are ABI-decoded from the data section. Field order in the result follows
/// the declaration order of the event inputs. Reserved-looking field names
/// are not renamed here; `address` is reported separately so collisions
/// cannot occur.
pub fn decode_log(
    events: &HashMap<B256, AbiEntry>,
    log: &RawLogEntry,
) -> Result<DecodedEvent, DecodeError> {
    let Some(topic0) = log.topics.first() else {
        return Err(DecodeError::InvalidPayload {
            schema: "<event>".to_string(),
            reason: "log has no topics".to_string(),
        });
    };
    let entry = events.get(topic0).ok_or_else(|| DecodeError::InvalidPayload {
        schema: "<event>".to_string(),
        reason: format!("can't find event with hash {topic0} in abi"),
    })?;

    let topic_params: Vec<&AbiParam> = entry
        .inputs
        .iter()
        .filter(|p| p.indexed == Some(true))
        .collect();
    let data_params: Vec<&AbiParam> = entry
        .inputs
        .iter()
        .filter(|p| p.indexed != Some(true))
        .collect();

    if log.topics.len() != topic_params.len() + 1 {
        return Err(DecodeError::InvalidPayload {
            schema: "<event>".to_string(),
            reason: format!(
                "expected {} indexed topics, log has {}",
                topic_params.len(),
                log.topics.len() - 1
            ),
        });
    }

    let mut decoded_topics = Vec::with_capacity(topic_params.len());
    for (param, topic) in topic_params.iter().zip(&log.topics[1..]) {
        decoded_topics.push(abi_decode_value(&param.canonical_type(), topic.as_slice())?);
    }

    let data_schema = format!(
        "({})",
        data_params
            .iter()
            .map(|p| p.canonical_type())
            .collect::<Vec<_>>()
            .join(",")
    );
    let decoded_data = abi_decode(&data_schema, &log.data)?;

    // re-align topics and data with declaration order
    let mut topics_ix = 0;
    let mut data_ix = 0;
    let mut fields = Vec::with_capacity(entry.inputs.len());
    for param in &entry.inputs {
        let value = if param.indexed == Some(true) {
            topics_ix += 1;
            decoded_topics[topics_ix - 1].clone()
        } else {
            data_ix += 1;
            decoded_data[data_ix - 1].clone()
        };
        fields.push((param.name.clone(), value));
    }

    Ok(DecodedEvent {
        address: log.address,
        name: entry.name.clone().unwrap_or_default(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::codec::abi_encode;
    use alloy::primitives::{address, U256};

    fn transfer_event() -> AbiEntry {
        AbiEntry {
            kind: "event".into(),
            name: Some("Transfer".into()),
            inputs: vec![
                AbiParam {
                    name: "sender".into(),
                    ty: "address".into(),
                    indexed: Some(true),
                    ..Default::default()
                },
                AbiParam {
                    name: "receiver".into(),
                    ty: "address".into(),
                    indexed: Some(true),
                    ..Default::default()
                },
                AbiParam {
                    name: "value".into(),
                    ty: "uint256".into(),
                    indexed: Some(false),
                    ..Default::default()
                },
            ],
            outputs: vec![],
            state_mutability: None,
            anonymous: Some(false),
        }
    }

    #[test]
    fn test_event_topic_hash() {
        // canonical ERC20 Transfer(address,address,uint256) topic
        let topic = event_topic(&transfer_event());
        assert_eq!(
            format!("{topic}"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_decode_log_merges_topics_and_data() {
        let entry = transfer_event();
        let events: HashMap<B256, AbiEntry> = [(event_topic(&entry), entry)].into();

        let sender = address!("C255fC198eEdAC7AF8aF0f6e0ca781794B094A61");
        let receiver = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        let emitter = address!("d878229c9c3575F224784DE610911B5607a3ad15");

        let log = RawLogEntry {
            log_id: 0,
            address: emitter,
            topics: vec![
                *events.keys().next().unwrap(),
                B256::left_padding_from(sender.as_slice()),
                B256::left_padding_from(receiver.as_slice()),
            ],
            data: abi_encode("(uint256)", &[AbiValue::from(1000u64)])
                .unwrap()
                .into(),
        };

        let decoded = decode_log(&events, &log).unwrap();
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.address, emitter);
        assert_eq!(decoded.field("sender"), Some(&AbiValue::Address(sender)));
        assert_eq!(decoded.field("receiver"), Some(&AbiValue::Address(receiver)));
        assert_eq!(decoded.field("value"), Some(&AbiValue::Uint(U256::from(1000))));
    }

    #[test]
    fn test_unknown_topic_fails_loudly() {
        let events = HashMap::new();
        let log = RawLogEntry {
            log_id: 0,
            address: Address::ZERO,
            topics: vec![B256::ZERO],
            data: Default::default(),
        };
        assert!(decode_log(&events, &log).is_err());
    }
}
