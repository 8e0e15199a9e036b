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
use std::str::FromStr;

use ethereum_types::{H160, H256};
use sp_core::crypto::{AccountId32, Ss58Codec};

use crate::types::ChainFamily;

/// Encodes an account into the 32 bytes the circuits take as public input.
///
/// EVM addresses are left padded with zeros, Substrate accounts (SS58 or
/// `0x` prefixed public keys) are their raw public key.
pub fn native_account_bytes(
    family: ChainFamily,
    account: &str,
) -> crate::Result<H256> {
    let invalid = |reason: &str| crate::Error::InvalidAccount {
        account: account.to_owned(),
        reason: reason.to_owned(),
    };
    match family {
        ChainFamily::Evm => {
            let hex = account
                .strip_prefix("0x")
                .ok_or_else(|| invalid("expected a 0x prefixed address"))?;
            if hex.len() != 40 {
                return Err(invalid("expected a 20 byte address"));
            }
            let address = H160::from_str(hex)
                .map_err(|_| invalid("address is not valid hex"))?;
            Ok(H256::from(address))
        }
        ChainFamily::Substrate => {
            if let Some(hex) = account.strip_prefix("0x") {
                if hex.len() != 64 {
                    return Err(invalid("expected a 32 byte public key"));
                }
                return H256::from_str(hex)
                    .map_err(|_| invalid("public key is not valid hex"));
            }
            let id = AccountId32::from_ss58check(account)
                .map_err(|e| invalid(&format!("{e:?}")))?;
            let raw: &[u8; 32] = id.as_ref();
            Ok(H256::from(*raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_addresses_are_left_padded() {
        let bytes = native_account_bytes(
            ChainFamily::Evm,
            "0xd24260c102b5d128cbefa0f655e5be3c2370677c",
        )
        .unwrap();
        assert_eq!(&bytes.as_bytes()[..12], &[0u8; 12]);
        assert_eq!(
            hex::encode(&bytes.as_bytes()[12..]),
            "d24260c102b5d128cbefa0f655e5be3c2370677c"
        );
    }

    #[test]
    fn substrate_accounts_decode_to_public_keys() {
        // Alice
        let bytes = native_account_bytes(
            ChainFamily::Substrate,
            "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY",
        )
        .unwrap();
        assert_eq!(
            hex::encode(bytes),
            "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d"
        );
        let same = native_account_bytes(
            ChainFamily::Substrate,
            "0xd43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d",
        )
        .unwrap();
        assert_eq!(bytes, same);
    }

    #[test]
    fn rejects_accounts_of_the_wrong_format() {
        let cases = [
            (ChainFamily::Evm, "d24260c102b5d128cbefa0f655e5be3c2370677c"),
            (ChainFamily::Evm, "0x1234"),
            (ChainFamily::Evm, "0xz24260c102b5d128cbefa0f655e5be3c2370677c"),
            (ChainFamily::Substrate, "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQZ"),
            (ChainFamily::Substrate, "0xd43593"),
            (ChainFamily::Substrate, ""),
        ];
        for (family, account) in cases {
            assert!(matches!(
                native_account_bytes(family, account),
                Err(crate::Error::InvalidAccount { .. })
            ));
        }
    }
}
