use sealbox_crypto::provider::generate_key_pair;
use sealbox_crypto::{decrypt_stream, encrypt_stream, EncryptedChunk, NoProgress, StreamOptions};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_seal_chunk(bencher: divan::Bencher, size: usize) {
    let keys = generate_key_pair().unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| EncryptedChunk::seal(divan::black_box(&keys), divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1048576, 8388608])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let keys = generate_key_pair().unwrap();
    let options = StreamOptions::default();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size + 4096);
            encrypt_stream(
                &mut divan::black_box(&data[..]),
                &mut out,
                &keys,
                &options,
                &NoProgress,
            )
            .unwrap();
            out
        });
}

#[divan::bench(args = [1048576, 8388608])]
fn bench_decrypt_stream(bencher: divan::Bencher, size: usize) {
    let keys = generate_key_pair().unwrap();
    let options = StreamOptions::default();
    let data = make_data(size);
    let mut encrypted = Vec::new();
    encrypt_stream(&mut &data[..], &mut encrypted, &keys, &options, &NoProgress).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size);
            decrypt_stream(
                &mut divan::black_box(&encrypted[..]),
                &mut out,
                &keys,
                &options,
                &NoProgress,
            )
            .unwrap();
            out
        });
}

fn main() {
    divan::main();
}
