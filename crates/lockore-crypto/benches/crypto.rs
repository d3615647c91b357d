use lockore_core::CancelToken;
use lockore_crypto::pbkdf2::{derive, Pbkdf2Params};
use lockore_crypto::{AesCbc, CipherKey, Framer, Sha3};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [256, 512])]
fn bench_sha3(bencher: divan::Bencher, bits: usize) {
    let data = make_data(65536);
    bencher
        .counter(divan::counter::BytesCount::new(data.len()))
        .bench(|| {
            let mut h = Sha3::new(bits).unwrap();
            h.update(divan::black_box(&data));
            h.finalize()
        });
}

#[divan::bench(args = [100, 1000])]
fn bench_pbkdf2(bencher: divan::Bencher, iterations: u32) {
    let params = Pbkdf2Params::new(iterations).without_floor();
    let cancel = CancelToken::new();
    bencher.bench(|| {
        derive(
            divan::black_box(b"p@ss"),
            divan::black_box(b"salt"),
            &params,
            &cancel,
            &mut |_| {},
        )
        .unwrap()
    });
}

#[divan::bench(args = [1024, 65536])]
fn bench_framer_encrypt(bencher: divan::Bencher, size: usize) {
    let framer = Framer::default();
    let key = CipherKey::new([7u8; 32], [1u8; 16]);
    let offset = framer.reserve();
    let mut buf = vec![0u8; offset + size];
    buf[offset..].copy_from_slice(&make_data(size));
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench_local(|| {
            framer
                .process(&mut AesCbc::encryptor(&key), &mut buf, offset, size, None)
                .unwrap()
        });
}

fn main() {
    divan::main();
}
