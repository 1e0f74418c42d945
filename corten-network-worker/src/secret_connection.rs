//! The encrypted peer channel.
//!
//! Station-to-station: exchange ephemeral X25519 keys, derive two
//! directional ChaCha20-Poly1305 keys and a challenge with HKDF-SHA256, then
//! prove the long-term Ed25519 identity by signing the challenge inside the
//! already-encrypted channel. The record layer seals fixed 1024-byte padded
//! plaintexts; a sealed frame is always 1040 bytes on the wire. Nonces are
//! per-direction little-endian counters and never reset.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use corten_network_exports::{NetworkError, NetworkResult, PeerId};
use corten_serialization::proto;
use corten_signature::{
    KeyPair, PublicKey, Signature, PUBLIC_KEY_SIZE_BYTES, SIGNATURE_SIZE_BYTES,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

/// Plaintext capacity of one frame, including the two-byte length header.
pub const FRAME_SIZE: usize = 1024;
/// Bytes of payload one frame can carry.
pub const FRAME_DATA_MAX: usize = FRAME_SIZE - 2;
/// Authentication tag size.
pub const TAG_SIZE: usize = 16;
/// A sealed frame on the wire.
pub const TOTAL_FRAME_SIZE: usize = FRAME_SIZE + TAG_SIZE;

const KDF_INFO: &[u8] = b"TENDERMINT_SECRET_CONNECTION_KEY_AND_CHALLENGE_GEN";

/// Per-direction 96-bit little-endian counter nonce.
struct NonceCounter(u64);

impl NonceCounter {
    fn new() -> Self {
        NonceCounter(0)
    }

    fn next(&mut self) -> NetworkResult<Nonce> {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&self.0.to_le_bytes());
        self.0 = self
            .0
            .checked_add(1)
            .ok_or_else(|| NetworkError::Crypto("nonce counter exhausted".into()))?;
        Ok(*Nonce::from_slice(&bytes))
    }
}

/// Sending half of a secret connection.
pub struct SecretWriter<W> {
    writer: W,
    cipher: ChaCha20Poly1305,
    nonce: NonceCounter,
}

impl<W: AsyncWrite + Unpin> SecretWriter<W> {
    /// Seal and send `data`, fragmenting into as many frames as needed.
    /// `data` may be empty (a single empty frame is sent).
    pub async fn write_chunk(&mut self, data: &[u8]) -> NetworkResult<()> {
        let mut remaining = data;
        loop {
            let take = remaining.len().min(FRAME_DATA_MAX);
            let (chunk, rest) = remaining.split_at(take);
            self.write_frame(chunk).await?;
            remaining = rest;
            if remaining.is_empty() {
                break;
            }
        }
        Ok(())
    }

    async fn write_frame(&mut self, chunk: &[u8]) -> NetworkResult<()> {
        debug_assert!(chunk.len() <= FRAME_DATA_MAX);
        let mut plaintext = [0u8; FRAME_SIZE];
        plaintext[..2].copy_from_slice(&(chunk.len() as u16).to_le_bytes());
        plaintext[2..2 + chunk.len()].copy_from_slice(chunk);

        let nonce = self.nonce.next()?;
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| NetworkError::Crypto("seal failed".into()))?;
        debug_assert_eq!(sealed.len(), TOTAL_FRAME_SIZE);
        self.writer.write_all(&sealed).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Receiving half of a secret connection.
pub struct SecretReader<R> {
    reader: R,
    cipher: ChaCha20Poly1305,
    nonce: NonceCounter,
}

impl<R: AsyncRead + Unpin> SecretReader<R> {
    /// Receive and open one frame, returning its payload.
    pub async fn read_frame(&mut self) -> NetworkResult<Vec<u8>> {
        let mut sealed = [0u8; TOTAL_FRAME_SIZE];
        self.reader.read_exact(&mut sealed).await?;

        let nonce = self.nonce.next()?;
        let plaintext = self
            .cipher
            .decrypt(&nonce, sealed.as_slice())
            .map_err(|_| NetworkError::BadSeal)?;
        if plaintext.len() != FRAME_SIZE {
            return Err(NetworkError::BadFrame(plaintext.len()));
        }
        let data_len = u16::from_le_bytes([plaintext[0], plaintext[1]]) as usize;
        if data_len > FRAME_DATA_MAX {
            return Err(NetworkError::BadFrame(data_len));
        }
        Ok(plaintext[2..2 + data_len].to_vec())
    }
}

fn derive_keys(
    shared_secret: &[u8],
    we_are_low: bool,
) -> NetworkResult<(ChaCha20Poly1305, ChaCha20Poly1305, [u8; 32])> {
    let kdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = Zeroizing::new([0u8; 96]);
    kdf.expand(KDF_INFO, &mut *okm)
        .map_err(|_| NetworkError::Crypto("kdf expand failed".into()))?;

    // the low side receives with the first key and sends with the second
    let (recv_key, send_key) = if we_are_low {
        (&okm[0..32], &okm[32..64])
    } else {
        (&okm[32..64], &okm[0..32])
    };
    let recv_cipher = ChaCha20Poly1305::new(Key::from_slice(recv_key));
    let send_cipher = ChaCha20Poly1305::new(Key::from_slice(send_key));
    let mut challenge = [0u8; 32];
    challenge.copy_from_slice(&okm[64..96]);
    Ok((recv_cipher, send_cipher, challenge))
}

async fn exchange_ephemeral<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    local_ephemeral_public: &x25519_dalek::PublicKey,
) -> NetworkResult<x25519_dalek::PublicKey> {
    // length-prefixed raw 32 bytes, both directions
    let mut prefixed = Vec::with_capacity(33);
    proto::write_uvarint(32, &mut prefixed);
    prefixed.extend_from_slice(local_ephemeral_public.as_bytes());
    stream.write_all(&prefixed).await?;
    stream.flush().await?;

    let remote_len = stream.read_u8().await?;
    if remote_len != 32 {
        return Err(NetworkError::Handshake(format!(
            "unexpected ephemeral key length {}",
            remote_len
        )));
    }
    let mut remote = [0u8; 32];
    stream.read_exact(&mut remote).await?;
    Ok(x25519_dalek::PublicKey::from(remote))
}

/// Run the station-to-station handshake over `stream`, returning the
/// encrypted halves and the authenticated remote identity.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    local_key: &KeyPair,
) -> NetworkResult<(
    SecretReader<tokio::io::ReadHalf<S>>,
    SecretWriter<tokio::io::WriteHalf<S>>,
    PeerId,
)> {
    // 1. ephemeral key exchange
    let local_ephemeral_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let local_ephemeral_public = x25519_dalek::PublicKey::from(&local_ephemeral_secret);
    let remote_ephemeral_public =
        exchange_ephemeral(&mut stream, &local_ephemeral_public).await?;

    // 2. the lexicographically smaller ephemeral key is the low side
    let we_are_low = local_ephemeral_public.as_bytes() < remote_ephemeral_public.as_bytes();

    // 3-4. shared secret and key/challenge derivation
    let shared_secret = local_ephemeral_secret.diffie_hellman(&remote_ephemeral_public);
    let (recv_cipher, send_cipher, challenge) =
        derive_keys(shared_secret.as_bytes(), we_are_low)?;

    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = SecretReader {
        reader: read_half,
        cipher: recv_cipher,
        nonce: NonceCounter::new(),
    };
    let mut writer = SecretWriter {
        writer: write_half,
        cipher: send_cipher,
        nonce: NonceCounter::new(),
    };

    // 5. prove the long-term identity over the encrypted channel
    let signature = local_key.sign(&challenge);
    let mut auth_message = Vec::with_capacity(PUBLIC_KEY_SIZE_BYTES + SIGNATURE_SIZE_BYTES);
    auth_message.extend_from_slice(local_key.get_public_key().to_bytes());
    auth_message.extend_from_slice(&signature.to_bytes());
    writer.write_chunk(&auth_message).await?;

    let remote_auth = reader.read_frame().await?;
    if remote_auth.len() != PUBLIC_KEY_SIZE_BYTES + SIGNATURE_SIZE_BYTES {
        return Err(NetworkError::Handshake(format!(
            "unexpected auth message length {}",
            remote_auth.len()
        )));
    }
    let remote_public = PublicKey::from_bytes(
        remote_auth[..PUBLIC_KEY_SIZE_BYTES]
            .try_into()
            .expect("length checked above"),
    )
    .map_err(|err| NetworkError::Handshake(err.to_string()))?;
    let remote_signature = Signature::from_slice(&remote_auth[PUBLIC_KEY_SIZE_BYTES..])
        .map_err(|err| NetworkError::Handshake(err.to_string()))?;
    remote_public
        .verify(&challenge, &remote_signature)
        .map_err(|_| NetworkError::Handshake("challenge signature mismatch".into()))?;

    Ok((reader, writer, PeerId::new(remote_public)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (
        (
            SecretReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
            SecretWriter<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
            PeerId,
        ),
        (
            SecretReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
            SecretWriter<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
            PeerId,
        ),
        KeyPair,
        KeyPair,
    ) {
        let key_a = KeyPair::generate();
        let key_b = KeyPair::generate();
        let (stream_a, stream_b) = tokio::io::duplex(64 * 1024);
        let (side_a, side_b) =
            tokio::join!(handshake(stream_a, &key_a), handshake(stream_b, &key_b));
        (side_a.unwrap(), side_b.unwrap(), key_a, key_b)
    }

    #[tokio::test]
    async fn handshake_authenticates_identities() {
        let ((_, _, peer_seen_by_a), (_, _, peer_seen_by_b), key_a, key_b) =
            connected_pair().await;
        assert_eq!(peer_seen_by_a, PeerId::new(key_b.get_public_key()));
        assert_eq!(peer_seen_by_b, PeerId::new(key_a.get_public_key()));
    }

    #[tokio::test]
    async fn ping_pong_frames_cross() {
        let ((mut reader_a, mut writer_a, _), (mut reader_b, mut writer_b, _), _, _) =
            connected_pair().await;

        writer_a.write_chunk(b"ping!").await.unwrap();
        let received = reader_b.read_frame().await.unwrap();
        assert_eq!(received, b"ping!");

        writer_b.write_chunk(b"pong!").await.unwrap();
        let received = reader_a.read_frame().await.unwrap();
        assert_eq!(received, b"pong!");
    }

    #[tokio::test]
    async fn wire_records_are_1040_bytes() {
        let key_a = KeyPair::generate();
        let key_b = KeyPair::generate();
        let (stream_a, stream_b) = tokio::io::duplex(64 * 1024);
        let ((_, mut writer_a, _), (mut reader_b, _, _)) = {
            let (a, b) = tokio::join!(handshake(stream_a, &key_a), handshake(stream_b, &key_b));
            (a.unwrap(), b.unwrap())
        };

        // 5 bytes of payload still seal into one full frame
        writer_a.write_chunk(b"ping!").await.unwrap();
        // read_frame consumes exactly TOTAL_FRAME_SIZE bytes off the wire: a
        // short frame would hang it, a long one would corrupt the next frame
        let received = reader_b.read_frame().await.unwrap();
        assert_eq!(received.len(), 5);
        assert_eq!(TOTAL_FRAME_SIZE, 1040);
    }

    #[tokio::test]
    async fn large_chunks_fragment() {
        let ((_, mut writer_a, _), (mut reader_b, _, _), _, _) = connected_pair().await;
        let data = vec![7u8; FRAME_DATA_MAX * 2 + 10];
        writer_a.write_chunk(&data).await.unwrap();
        let mut received = Vec::new();
        while received.len() < data.len() {
            received.extend(reader_b.read_frame().await.unwrap());
        }
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn sequence_mismatch_rejected() {
        let ((_, mut writer_a, _), (mut reader_b, _, _), _, _) = connected_pair().await;
        writer_a.write_chunk(b"first").await.unwrap();
        assert_eq!(reader_b.read_frame().await.unwrap(), b"first");

        // a skipped counter value on the receiver breaks authentication of
        // every later frame
        reader_b.nonce.0 += 1;
        writer_a.write_chunk(b"second").await.unwrap();
        assert!(matches!(
            reader_b.read_frame().await,
            Err(NetworkError::BadSeal)
        ));
    }
}
