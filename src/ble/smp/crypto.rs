//! SMP legacy pairing crypto: `c1` confirm-value and `s1` STK-derivation
//! functions, built on the `aes` crate for the underlying AES-128 block
//! cipher. Byte-order handling and the overall `p1`/`p2` construction
//! follow the known-answer vector spelled out alongside this code's unit
//! test.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

fn aes128_encrypt(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut block);
    block.into()
}

fn reversed<const N: usize>(bytes: &[u8; N]) -> [u8; N] {
    let mut out = *bytes;
    out.reverse();
    out
}

/// Confirm-value function `c1` for legacy pairing.
///
/// `pres`/`preq` are the 7-byte SMP Pairing Response/Request PDUs exactly
/// as they went over the air; `iat`/`rat` are the initiator/responder
/// address-type octets (0 = public, 1 = random); `ia`/`ra` are the 6-byte
/// addresses. All multi-byte wire fields are transmitted LSB-first and
/// must be reversed before use in the big-endian `p1`/`p2` construction.
pub fn c1(
    k: &[u8; 16],
    r: &[u8; 16],
    pres: &[u8; 7],
    preq: &[u8; 7],
    iat: u8,
    rat: u8,
    ia: &[u8; 6],
    ra: &[u8; 6],
) -> [u8; 16] {
    let mut p1 = [0u8; 16];
    p1[0..7].copy_from_slice(&reversed(pres));
    p1[7..14].copy_from_slice(&reversed(preq));
    p1[14] = rat;
    p1[15] = iat;

    let mut p2 = [0u8; 16];
    p2[4..10].copy_from_slice(&reversed(ia));
    p2[10..16].copy_from_slice(&reversed(ra));

    let mut t = [0u8; 16];
    for i in 0..16 {
        t[i] = r[i] ^ p1[i];
    }
    let t = aes128_encrypt(k, &t);

    let mut t2 = [0u8; 16];
    for i in 0..16 {
        t2[i] = t[i] ^ p2[i];
    }
    aes128_encrypt(k, &t2)
}

/// STK-derivation function `s1` for legacy pairing: concatenates the lower
/// 64 bits of each random value and encrypts the result.
pub fn s1(k: &[u8; 16], r1: &[u8; 16], r2: &[u8; 16]) -> [u8; 16] {
    let mut r = [0u8; 16];
    r[0..8].copy_from_slice(&r2[8..16]);
    r[8..16].copy_from_slice(&r1[8..16]);
    aes128_encrypt(k, &r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c1_matches_known_answer_vector() {
        let k = [0u8; 16];
        let r = hex_array("5783D52156AD6F0E6388274EC6702EE0");
        // The known-answer PRES/PREQ/IA/RA are quoted in c1's big-endian
        // p1/p2 form; c1 itself takes them as they appear on the wire
        // (LSB-first) and reverses internally, so the inputs here are
        // byte-reversed from that canonical form.
        let pres = hex_array7("02030000080005");
        let preq = hex_array7("01010000100707");
        let ia = [0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1];
        let ra = [0xB6, 0xB5, 0xB4, 0xB3, 0xB2, 0xB1];
        // IA is random (iat=1), RA is public (rat=0).
        let confirm = c1(&k, &r, &pres, &preq, 1, 0, &ia, &ra);
        assert_eq!(
            confirm,
            hex_array("1E1E3FEF878988EAD2A74DC5BEF13B86")
        );
    }

    fn hex_array(s: &str) -> [u8; 16] {
        let bytes = hex::decode(s).unwrap();
        bytes.try_into().unwrap()
    }

    fn hex_array7(s: &str) -> [u8; 7] {
        let bytes = hex::decode(s).unwrap();
        bytes.try_into().unwrap()
    }
}
