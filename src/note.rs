// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! The deposit note.
//!
//! A note is the secret bundle handed out at deposit time. Its canonical
//! string form is
//!
//! ```text
//! webb://v1:{backend}:{curve}/{source}:{dest}/{symbol}:{denomination}:{amount}/{secret}:{nullifier}
//! ```
//!
//! where `source` and `dest` are typed chain ids in their integer form and
//! `secret`/`nullifier` are 32 byte lower case hex values. Parsing accepts
//! only the canonical form, so serializing a parsed note gives back the same
//! string.
use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use ethereum_types::H256;

use crate::merkle::PoseidonHasher;
use crate::types::{Leaf, TypedChainId};
use crate::{Error, Result};

const SCHEME: &str = "webb://";
const MAX_SYMBOL_LEN: usize = 16;

/// Version of the note encoding.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteVersion {
    /// The first (and only) version.
    #[display(fmt = "v1")]
    V1,
}

/// The proving backend the note was created for.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Arkworks circuits (Substrate mixers).
    #[display(fmt = "arkworks")]
    Arkworks,
    /// Circom circuits (EVM anchors).
    #[display(fmt = "circom")]
    Circom,
}

/// The curve of the note's commitment.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    /// BN254.
    #[display(fmt = "bn254")]
    Bn254,
}

/// A deposit note. Immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct Note {
    version: NoteVersion,
    backend: Backend,
    curve: Curve,
    source_chain_id: TypedChainId,
    dest_chain_id: TypedChainId,
    token_symbol: String,
    denomination: u8,
    amount: String,
    secret: H256,
    nullifier: H256,
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note")
            .field("version", &self.version)
            .field("backend", &self.backend)
            .field("curve", &self.curve)
            .field("source_chain_id", &self.source_chain_id)
            .field("dest_chain_id", &self.dest_chain_id)
            .field("token_symbol", &self.token_symbol)
            .field("denomination", &self.denomination)
            .field("amount", &self.amount)
            .field("secret", &"<redacted>")
            .field("nullifier", &"<redacted>")
            .finish()
    }
}

impl Note {
    /// Creates a V1 note from its parts, validating the textual fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Backend,
        curve: Curve,
        source_chain_id: TypedChainId,
        dest_chain_id: TypedChainId,
        token_symbol: impl Into<String>,
        denomination: u8,
        amount: impl Into<String>,
        secret: H256,
        nullifier: H256,
    ) -> Result<Self> {
        let token_symbol = token_symbol.into();
        let amount = amount.into();
        check_symbol(&token_symbol)?;
        check_amount(&amount)?;
        Ok(Self {
            version: NoteVersion::V1,
            backend,
            curve,
            source_chain_id,
            dest_chain_id,
            token_symbol,
            denomination,
            amount,
            secret,
            nullifier,
        })
    }

    /// Parses a note from its canonical string.
    pub fn parse(input: &str) -> Result<Self> {
        let rest = input
            .strip_prefix(SCHEME)
            .ok_or_else(|| malformed("missing `webb://` scheme"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        let [header, chains, asset, secrets] = parts[..] else {
            return Err(malformed("expected four `/` separated sections"));
        };

        let (version, backend, curve) = match split3(header)? {
            ("v1", backend, curve) => (NoteVersion::V1, backend, curve),
            (other, _, _) => {
                return Err(malformed(format!("unsupported version `{other}`")))
            }
        };
        let backend = match backend {
            "arkworks" => Backend::Arkworks,
            "circom" => Backend::Circom,
            other => {
                return Err(malformed(format!("unsupported backend `{other}`")))
            }
        };
        let curve = match curve {
            "bn254" => Curve::Bn254,
            other => {
                return Err(malformed(format!("unsupported curve `{other}`")))
            }
        };

        let (source, dest) = split2(chains)?;
        let source_chain_id = parse_chain(source)?;
        let dest_chain_id = parse_chain(dest)?;

        let (token_symbol, denomination, amount) = split3(asset)?;
        check_symbol(token_symbol)?;
        check_canonical_number(denomination)?;
        let denomination = denomination
            .parse::<u8>()
            .map_err(|_| malformed("denomination must fit in a byte"))?;
        check_amount(amount)?;

        let (secret, nullifier) = split2(secrets)?;
        let note = Self {
            version,
            backend,
            curve,
            source_chain_id,
            dest_chain_id,
            token_symbol: token_symbol.to_owned(),
            denomination,
            amount: amount.to_owned(),
            secret: parse_secret(secret)?,
            nullifier: parse_secret(nullifier)?,
        };
        Ok(note)
    }

    /// Serializes the note to its canonical string.
    pub fn serialize(&self) -> String {
        format!(
            "{SCHEME}{}:{}:{}/{}:{}/{}:{}:{}/{}:{}",
            self.version,
            self.backend,
            self.curve,
            self.source_chain_id.chain_id(),
            self.dest_chain_id.chain_id(),
            self.token_symbol,
            self.denomination,
            self.amount,
            hex::encode(self.secret),
            hex::encode(self.nullifier),
        )
    }

    /// The commitment inserted in the pool at deposit time.
    pub fn leaf_commitment(&self, hasher: &PoseidonHasher) -> Result<Leaf> {
        hasher.hash_two(&self.secret, &self.nullifier)
    }

    /// The public nullifier hash, spent on withdrawal.
    pub fn nullifier_hash(&self, hasher: &PoseidonHasher) -> Result<H256> {
        hasher.hash_two(&self.nullifier, &self.nullifier)
    }

    /// Whether the withdrawal happens on another chain than the deposit.
    pub fn is_cross_chain(&self) -> bool {
        self.source_chain_id != self.dest_chain_id
    }

    /// Encoding version.
    pub fn version(&self) -> NoteVersion {
        self.version
    }

    /// Proving backend.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Commitment curve.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Chain the deposit was made on.
    pub fn source_chain_id(&self) -> TypedChainId {
        self.source_chain_id
    }

    /// Chain the withdrawal is made on.
    pub fn dest_chain_id(&self) -> TypedChainId {
        self.dest_chain_id
    }

    /// Symbol of the deposited asset.
    pub fn token_symbol(&self) -> &str {
        &self.token_symbol
    }

    /// Decimals of the deposited asset.
    pub fn denomination(&self) -> u8 {
        self.denomination
    }

    /// Deposited amount, in whole units of the asset.
    pub fn amount(&self) -> &str {
        &self.amount
    }

    /// The note secret. Only ever handed to the prover.
    pub fn secret(&self) -> &H256 {
        &self.secret
    }

    /// The note nullifier. Only ever handed to the prover.
    pub fn nullifier(&self) -> &H256 {
        &self.nullifier
    }
}

impl FromStr for Note {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedNote(reason.into())
}

fn split2(section: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = section.split(':').collect();
    match parts[..] {
        [a, b] => Ok((a, b)),
        _ => Err(malformed(format!("expected two `:` fields in `{section}`"))),
    }
}

fn split3(section: &str) -> Result<(&str, &str, &str)> {
    let parts: Vec<&str> = section.split(':').collect();
    match parts[..] {
        [a, b, c] => Ok((a, b, c)),
        _ => Err(malformed(format!(
            "expected three `:` fields in `{section}`"
        ))),
    }
}

/// Digits only, no sign and no leading zeros.
fn check_canonical_number(value: &str) -> Result<()> {
    let digits_only =
        !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    if !digits_only || (value.len() > 1 && value.starts_with('0')) {
        return Err(malformed(format!("`{value}` is not a canonical number")));
    }
    Ok(())
}

fn parse_chain(value: &str) -> Result<TypedChainId> {
    check_canonical_number(value)?;
    let raw = value
        .parse::<u64>()
        .map_err(|_| malformed(format!("chain id `{value}` is too large")))?;
    TypedChainId::from_chain_id(raw)
        .ok_or_else(|| malformed(format!("unknown chain type in `{value}`")))
}

fn check_symbol(value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= MAX_SYMBOL_LEN
        && value.bytes().all(|b| b.is_ascii_alphanumeric());
    if !valid {
        return Err(malformed(format!("invalid token symbol `{value}`")));
    }
    Ok(())
}

/// A canonical decimal: no leading zeros and no trailing fractional zeros.
fn check_amount(value: &str) -> Result<()> {
    let (int, frac) = match value.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (value, None),
    };
    check_canonical_number(int)
        .map_err(|_| malformed(format!("invalid amount `{value}`")))?;
    if let Some(frac) = frac {
        let valid = !frac.is_empty()
            && frac.bytes().all(|b| b.is_ascii_digit())
            && !frac.ends_with('0');
        if !valid {
            return Err(malformed(format!("invalid amount `{value}`")));
        }
    }
    Ok(())
}

fn parse_secret(value: &str) -> Result<H256> {
    let canonical = value.len() == 64
        && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !canonical {
        return Err(malformed("secrets must be 32 bytes of lower case hex"));
    }
    let bytes = hex::decode(value)
        .map_err(|e| malformed(format!("invalid secret hex: {e}")))?;
    Ok(H256::from_slice(&bytes))
}
