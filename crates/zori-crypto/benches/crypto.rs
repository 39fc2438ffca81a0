use secrecy::SecretString;
use zori_crypto::{generate_iv, generate_master_keys, KdfParams, KeyVault, PackEncryptor};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_pack_encrypt(bencher: divan::Bencher, size: usize) {
    let keys = generate_master_keys();
    let iv = generate_iv();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| data.clone())
        .bench_refs(|buf| {
            let mut enc = PackEncryptor::new(&keys, &iv).unwrap();
            enc.encrypt_in_place(divan::black_box(buf));
            enc.finalize()
        });
}

#[divan::bench]
fn bench_envelope_open(bencher: divan::Bencher) {
    let vault = KeyVault::new(KdfParams {
        mem_cost_kib: 8192,
        time_cost: 1,
        parallelism: 1,
    });
    let password = SecretString::from("bench-password");
    let envelope = vault.seal(&password, &generate_master_keys()).unwrap();
    bencher.bench(|| vault.open(divan::black_box(&password), &envelope).unwrap());
}

fn main() {
    divan::main();
}
