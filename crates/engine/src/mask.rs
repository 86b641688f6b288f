//! Masking Engine
//!
//! Turns a detected entity set into redacted text. Substitutions run in
//! descending span order so earlier offsets stay valid while the string is
//! rewritten; bytes outside redacted spans are untouched. Placeholder and
//! token formats are chosen so redacted output never re-matches a recognizer
//! (re-redacting already-redacted text is a no-op).

use sha2::{Digest, Sha256};

use crate::models::{Entity, EntityType, MaskStrategy};
use crate::profile::{CustomMasker, ProtectionProfile};

const MASK_CHAR: char = '*';

/// Normalized form of a raw value, used as the registry key and as hash
/// input: digits-only for numeric identifiers, lowercased for addressable
/// ones, trimmed otherwise.
pub fn normalize(entity_type: &EntityType, raw: &str) -> String {
    match entity_type {
        EntityType::Phone
        | EntityType::Ssn
        | EntityType::CreditCard
        | EntityType::AccountNumber
        | EntityType::RoutingNumber => raw.chars().filter(|c| c.is_ascii_digit()).collect(),
        EntityType::Email | EntityType::DatabaseUrl | EntityType::IpAddress => {
            raw.trim().to_lowercase()
        }
        _ => raw.trim().to_string(),
    }
}

fn last_digits(raw: &str, n: usize) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits[digits.len().saturating_sub(n)..].iter().collect()
}

fn last_chars(raw: &str, n: usize) -> String {
    let chars: Vec<char> = raw.chars().collect();
    chars[chars.len().saturating_sub(n)..].iter().collect()
}

fn mask_middle(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 4 {
        return MASK_CHAR.to_string().repeat(chars.len());
    }
    let mut out = String::with_capacity(chars.len());
    out.push(chars[0]);
    out.extend(std::iter::repeat(MASK_CHAR).take(chars.len() - 2));
    out.push(chars[chars.len() - 1]);
    out
}

/// Email local parts keep only their first character. The character next
/// to `@` is always masked, so a masked email never re-matches the email
/// recognizer and re-redaction stays a no-op. Locals too short to keep
/// anything become a single mask character.
fn mask_local_part(local: &str) -> String {
    let chars: Vec<char> = local.chars().collect();
    if chars.len() <= 1 {
        return MASK_CHAR.to_string();
    }
    let mut out = String::with_capacity(chars.len());
    out.push(chars[0]);
    out.extend(std::iter::repeat(MASK_CHAR).take(chars.len() - 1));
    out
}

/// Partial masking keeps a type-appropriate prefix/suffix so humans can
/// still correlate values: domain of an email, last four of a numeric id.
fn partial(entity_type: &EntityType, raw: &str) -> String {
    match entity_type {
        EntityType::Email => match raw.split_once('@') {
            Some((local, domain)) => format!("{}@{}", mask_local_part(local), domain),
            None => mask_middle(raw),
        },
        EntityType::Phone => format!("***-***-{}", last_digits(raw, 4)),
        EntityType::CreditCard => format!("****-****-****-{}", last_digits(raw, 4)),
        EntityType::Ssn => format!("***-**-{}", last_digits(raw, 4)),
        EntityType::AccountNumber => format!("****{}", last_digits(raw, 4)),
        EntityType::RoutingNumber => format!("*****{}", last_digits(raw, 4)),
        EntityType::ApiKey => match raw.split_once('-').or_else(|| raw.split_once('_')) {
            Some((scheme, rest)) if rest.chars().count() > 4 => {
                format!("{}-...{}", scheme, last_chars(rest, 4))
            }
            _ => mask_middle(raw),
        },
        EntityType::DatabaseUrl => "***://***:***@***".to_string(),
        EntityType::IpAddress => match raw.split_once('.') {
            Some((first, _)) => format!("{}.***.***.***", first),
            None => mask_middle(raw),
        },
        _ => mask_middle(raw),
    }
}

fn full(entity_type: &EntityType) -> String {
    format!("[REDACTED_{}]", entity_type.label())
}

/// Deterministic one-way token: sha-256 of the normalized value, truncated.
/// The `x` prefix keeps the hex run from ever parsing as a bare digit run.
fn hash_token(entity_type: &EntityType, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.code().as_bytes());
    hasher.update(b":");
    hasher.update(normalize(entity_type, raw).as_bytes());
    let digest = hex::encode(&hasher.finalize()[..5]);
    format!("[{}#x{}]", entity_type.label(), digest)
}

/// Compute the masked token for one entity under the profile's strategy.
pub fn mask_value(
    entity_type: &EntityType,
    raw: &str,
    strategy: MaskStrategy,
    custom_masker: Option<&CustomMasker>,
) -> String {
    match strategy {
        MaskStrategy::Partial => partial(entity_type, raw),
        MaskStrategy::Full => full(entity_type),
        MaskStrategy::Hash => hash_token(entity_type, raw),
        MaskStrategy::Custom => match custom_masker {
            Some(masker) => masker(raw),
            // Resolver rejects this combination; fall back rather than leak.
            None => full(entity_type),
        },
    }
}

/// Substitute every entity span in `content` with the token produced by
/// `resolver`. Entities must be non-overlapping (the detector guarantees
/// this); they are applied right-to-left.
pub fn apply(
    content: &str,
    entities: &[Entity],
    resolver: &mut dyn FnMut(&Entity) -> String,
) -> String {
    let mut ordered: Vec<&Entity> = entities.iter().collect();
    ordered.sort_by(|a, b| b.span.start.cmp(&a.span.start));

    let mut redacted = content.to_string();
    for entity in ordered {
        if entity.span.end > redacted.len() || !redacted.is_char_boundary(entity.span.start) {
            continue;
        }
        let token = resolver(entity);
        redacted.replace_range(entity.span.clone(), &token);
    }
    redacted
}

/// Strategy lookup with a safe default: an enabled type with no strategy
/// entry is fully masked.
pub fn strategy_for(profile: &ProtectionProfile, entity_type: &EntityType) -> MaskStrategy {
    profile
        .strategy_by_type
        .get(entity_type)
        .copied()
        .unwrap_or(MaskStrategy::Full)
}
