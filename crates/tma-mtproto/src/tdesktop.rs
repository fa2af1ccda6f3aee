//! Desktop-session (tdata) storage.
//!
//! Handles the desktop client's on-disk container: a `TDF$` magic +
//! version header with an MD5 trailer, Qt-style big-endian byte-array
//! framing, and key data encrypted AES-256-IGE under a PBKDF2-derived
//! local key. Only the key files and the MTP authorization record are
//! read; other settings blocks are skipped.

use std::{fs, path::Path};

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use md5::{Digest as _, Md5};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha1::Sha1;
use sha2::Sha512;

use tma_core::{errors::Error, Result};

const TDF_MAGIC: &[u8; 4] = b"TDF$";
const TDF_VERSION: i32 = 5_003_001;

const KEY_FILE: &str = "key_datas";
const MTP_AUTHORIZATION_BLOCK: i32 = 0x4b;

const LOCAL_KEY_LEN: usize = 256;
const PASSCODE_ITERATIONS: u32 = 100_000;

/// One account's authorization data, as stored in a desktop session
/// directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesktopAccount {
    pub user_id: i64,
    pub main_dc_id: i32,
    pub auth_keys: Vec<(i32, [u8; 256])>,
}

impl DesktopAccount {
    /// Auth key for the account's home datacenter.
    pub fn main_auth_key(&self) -> Option<&[u8; 256]> {
        self.auth_keys
            .iter()
            .find(|(dc, _)| *dc == self.main_dc_id)
            .map(|(_, key)| key)
    }
}

/// Load the account stored under `dir`. The directory must hold a
/// passcode-less key file; a passcode-protected session cannot be used
/// unattended and surfaces as an invalid session.
pub fn load_account(dir: &Path) -> Result<DesktopAccount> {
    if !dir.is_dir() {
        return Err(Error::SessionInvalid(format!(
            "desktop session directory missing: {}",
            dir.display()
        )));
    }

    let key_payload = read_tdf(&dir.join(KEY_FILE))?;
    let mut reader = Reader::new(&key_payload);
    let salt = reader.bytes()?;
    let key_encrypted = reader.bytes()?;
    let info_encrypted = reader.bytes()?;

    let passcode_key = create_local_key(b"", &salt);
    let local_key = to_auth_key(&decrypt_local(&key_encrypted, &passcode_key)?)?;

    let info = decrypt_local(&info_encrypted, &local_key)?;
    let mut reader = Reader::new(&info);
    let count = reader.i32_be()?;
    let index = if count > 0 { reader.i32_be()? } else { 0 };

    let data_payload = read_tdf(&dir.join(format!("{}s", file_part(&data_name(index)))))?;
    let mut reader = Reader::new(&data_payload);
    let blob = reader.bytes()?;
    let record = decrypt_local(&blob, &local_key)?;
    parse_account_record(&record)
}

/// Persist `account` under `dir` with a freshly generated local key.
pub fn save_account(dir: &Path, account: &DesktopAccount) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut rng = rand::thread_rng();

    let mut salt = [0u8; 32];
    rng.fill(&mut salt[..]);
    let mut local_key = [0u8; LOCAL_KEY_LEN];
    rng.fill(&mut local_key[..]);

    let passcode_key = create_local_key(b"", &salt);
    let key_encrypted = encrypt_local(&local_key, &passcode_key, &mut rng);

    // Account index info: one account at index 0.
    let mut info = Vec::new();
    info.extend_from_slice(&1i32.to_be_bytes());
    info.extend_from_slice(&0i32.to_be_bytes());
    let info_encrypted = encrypt_local(&info, &local_key, &mut rng);

    let mut key_payload = Vec::new();
    put_bytes(&mut key_payload, &salt);
    put_bytes(&mut key_payload, &key_encrypted);
    put_bytes(&mut key_payload, &info_encrypted);
    write_tdf(&dir.join(KEY_FILE), &key_payload)?;

    let mut body = Vec::new();
    body.extend_from_slice(&(-1i32).to_be_bytes());
    body.extend_from_slice(&(-1i32).to_be_bytes());
    body.extend_from_slice(&(account.user_id as u64).to_be_bytes());
    body.extend_from_slice(&account.main_dc_id.to_be_bytes());
    body.extend_from_slice(&(account.auth_keys.len() as i32).to_be_bytes());
    for (dc_id, key) in &account.auth_keys {
        body.extend_from_slice(&dc_id.to_be_bytes());
        body.extend_from_slice(key);
    }

    let mut record = Vec::new();
    record.extend_from_slice(&MTP_AUTHORIZATION_BLOCK.to_be_bytes());
    put_bytes(&mut record, &body);

    let blob = encrypt_local(&record, &local_key, &mut rng);
    let mut data_payload = Vec::new();
    put_bytes(&mut data_payload, &blob);
    write_tdf(&dir.join(format!("{}s", file_part("data"))), &data_payload)
}

fn parse_account_record(record: &[u8]) -> Result<DesktopAccount> {
    let mut reader = Reader::new(record);
    while reader.remaining() > 0 {
        let block_id = reader.i32_be()?;
        let body = reader.bytes()?;
        if block_id != MTP_AUTHORIZATION_BLOCK {
            continue;
        }

        let mut body = Reader::new(&body);
        let legacy_user_id = body.i32_be()?;
        let legacy_main_dc = body.i32_be()?;
        let (user_id, main_dc_id) = if legacy_user_id == -1 && legacy_main_dc == -1 {
            (body.u64_be()? as i64, body.i32_be()?)
        } else {
            (i64::from(legacy_user_id), legacy_main_dc)
        };

        let count = body.i32_be()?;
        let mut auth_keys = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let dc_id = body.i32_be()?;
            auth_keys.push((dc_id, to_auth_key(body.take(256)?)?));
        }

        return Ok(DesktopAccount {
            user_id,
            main_dc_id,
            auth_keys,
        });
    }

    Err(Error::SessionInvalid(
        "desktop session carries no authorization record".to_string(),
    ))
}

fn data_name(index: i32) -> String {
    if index == 0 {
        "data".to_string()
    } else {
        format!("data#{}", index + 1)
    }
}

/// Map a logical data name to its on-disk file stem: the first half of
/// its MD5, hex-encoded low nibble first. `data` maps to
/// `D877F783D5D3EF8C`.
fn file_part(name: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let digest = Md5::digest(name.as_bytes());
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        out.push(HEX[(b & 0x0f) as usize] as char);
        out.push(HEX[(b >> 4) as usize] as char);
    }
    out
}

// ============== TDF container ==============

fn read_tdf(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path).map_err(|e| {
        Error::SessionInvalid(format!("cannot read {}: {e}", path.display()))
    })?;
    if raw.len() < 24 || &raw[..4] != TDF_MAGIC {
        return Err(Error::SessionInvalid(format!(
            "{} is not a desktop session file",
            path.display()
        )));
    }

    let payload = raw[8..raw.len() - 16].to_vec();
    let mut md5 = Md5::new();
    md5.update(&payload);
    md5.update((payload.len() as i32).to_le_bytes());
    md5.update(&raw[4..8]);
    md5.update(TDF_MAGIC);
    if md5.finalize()[..] != raw[raw.len() - 16..] {
        return Err(Error::SessionInvalid(format!(
            "{} is corrupted (checksum mismatch)",
            path.display()
        )));
    }

    Ok(payload)
}

fn write_tdf(path: &Path, payload: &[u8]) -> Result<()> {
    let version = TDF_VERSION.to_le_bytes();

    let mut md5 = Md5::new();
    md5.update(payload);
    md5.update((payload.len() as i32).to_le_bytes());
    md5.update(version);
    md5.update(TDF_MAGIC);

    let mut out = Vec::with_capacity(payload.len() + 24);
    out.extend_from_slice(TDF_MAGIC);
    out.extend_from_slice(&version);
    out.extend_from_slice(payload);
    out.extend_from_slice(&md5.finalize());
    fs::write(path, out)?;
    Ok(())
}

// ============== Local key + encryption ==============

/// Derive the local key from a passcode and salt. The desktop client
/// uses a single PBKDF2 round when no passcode is set.
fn create_local_key(passcode: &[u8], salt: &[u8]) -> [u8; LOCAL_KEY_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(passcode);
    hasher.update(salt);
    let pass_hash = hasher.finalize();

    let iterations = if passcode.is_empty() {
        1
    } else {
        PASSCODE_ITERATIONS
    };

    let mut key = [0u8; LOCAL_KEY_LEN];
    pbkdf2_hmac::<Sha512>(&pass_hash, salt, iterations, &mut key);
    key
}

fn encrypt_local(plain: &[u8], key: &[u8; LOCAL_KEY_LEN], rng: &mut impl Rng) -> Vec<u8> {
    let full_len = 4 + plain.len();
    let padded_len = full_len.div_ceil(16) * 16;

    let mut data = Vec::with_capacity(padded_len);
    data.extend_from_slice(&(full_len as u32).to_le_bytes());
    data.extend_from_slice(plain);
    while data.len() < padded_len {
        data.push(rng.gen());
    }

    let msg_key: [u8; 16] = sha1_of(&[&data])[..16].try_into().expect("sha1 is 20 bytes");
    let (aes_key, aes_iv) = local_aes_params(key, &msg_key);
    aes_ige(&mut data, &aes_key, &aes_iv, true);

    let mut out = Vec::with_capacity(16 + data.len());
    out.extend_from_slice(&msg_key);
    out.extend_from_slice(&data);
    out
}

fn decrypt_local(encrypted: &[u8], key: &[u8; LOCAL_KEY_LEN]) -> Result<Vec<u8>> {
    if encrypted.len() < 32 || (encrypted.len() - 16) % 16 != 0 {
        return Err(Error::SessionInvalid(
            "encrypted desktop data has invalid length".to_string(),
        ));
    }

    let msg_key: [u8; 16] = encrypted[..16].try_into().expect("checked length");
    let mut data = encrypted[16..].to_vec();
    let (aes_key, aes_iv) = local_aes_params(key, &msg_key);
    aes_ige(&mut data, &aes_key, &aes_iv, false);

    if sha1_of(&[&data])[..16] != msg_key {
        return Err(Error::SessionInvalid(
            "desktop data does not match its key (wrong or passcode-protected key file)"
                .to_string(),
        ));
    }

    let full_len = u32::from_le_bytes(data[..4].try_into().expect("checked length")) as usize;
    if full_len < 4 || full_len > data.len() {
        return Err(Error::SessionInvalid(
            "desktop data declares an invalid length".to_string(),
        ));
    }

    Ok(data[4..full_len].to_vec())
}

/// Storage-flavoured MTProto v1 key derivation (offset 8).
fn local_aes_params(auth_key: &[u8; LOCAL_KEY_LEN], msg_key: &[u8; 16]) -> ([u8; 32], [u8; 32]) {
    const X: usize = 8;
    let a = sha1_of(&[msg_key, &auth_key[X..X + 32]]);
    let b = sha1_of(&[&auth_key[32 + X..48 + X], msg_key, &auth_key[48 + X..64 + X]]);
    let c = sha1_of(&[&auth_key[64 + X..96 + X], msg_key]);
    let d = sha1_of(&[msg_key, &auth_key[96 + X..128 + X]]);

    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&a[..8]);
    key[8..20].copy_from_slice(&b[8..20]);
    key[20..32].copy_from_slice(&c[4..16]);

    let mut iv = [0u8; 32];
    iv[..12].copy_from_slice(&a[8..20]);
    iv[12..20].copy_from_slice(&b[..8]);
    iv[20..24].copy_from_slice(&c[16..20]);
    iv[24..32].copy_from_slice(&d[..8]);

    (key, iv)
}

fn sha1_of(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// AES-256-IGE over whole blocks, in place.
fn aes_ige(data: &mut [u8], key: &[u8; 32], iv: &[u8; 32], encrypt: bool) {
    debug_assert_eq!(data.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut y_prev: [u8; 16] = iv[..16].try_into().expect("iv half");
    let mut x_prev: [u8; 16] = iv[16..].try_into().expect("iv half");

    for block in data.chunks_exact_mut(16) {
        let input: [u8; 16] = block.try_into().expect("whole block");
        let mut work = [0u8; 16];
        let (chain_pre, chain_post) = if encrypt {
            (y_prev, x_prev)
        } else {
            (x_prev, y_prev)
        };
        for i in 0..16 {
            work[i] = input[i] ^ chain_pre[i];
        }

        let ga = GenericArray::from_mut_slice(&mut work);
        if encrypt {
            cipher.encrypt_block(ga);
        } else {
            cipher.decrypt_block(ga);
        }

        for i in 0..16 {
            work[i] ^= chain_post[i];
        }
        block.copy_from_slice(&work);

        if encrypt {
            x_prev = input;
            y_prev = work;
        } else {
            y_prev = input;
            x_prev = work;
        }
    }
}

fn to_auth_key(raw: &[u8]) -> Result<[u8; 256]> {
    raw.try_into().map_err(|_| {
        Error::SessionInvalid("desktop auth key has the wrong length".to_string())
    })
}

// ============== Byte stream helpers ==============

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::SessionInvalid(
                "desktop session data is truncated".to_string(),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn i32_be(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    /// Qt byte array: big-endian u32 length prefix, `0xffffffff` for
    /// the null array.
    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes"));
        if len == u32::MAX {
            return Ok(Vec::new());
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

fn put_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}
