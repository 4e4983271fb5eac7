use std::sync::OnceLock;

use ethereum_types::{H256, H512};
use hex_literal::hex;
use meowpow::{
    build_light_cache, calc_dataset_item_1024, calculate_epoch_seed, keccak_256,
    light_cache_num_items, verify, verify_final_hash, ContextCache, EpochContext, Error,
    FullEpochContext,
};

fn cache_epoch0() -> &'static [H512] {
    static CACHE: OnceLock<Vec<H512>> = OnceLock::new();
    CACHE.get_or_init(|| {
        let mut cache = vec![H512::zero(); light_cache_num_items(0)];
        build_light_cache(&mut cache, calculate_epoch_seed(0));
        cache
    })
}

fn context_epoch0() -> &'static EpochContext {
    static CONTEXT: OnceLock<EpochContext> = OnceLock::new();
    CONTEXT.get_or_init(|| EpochContext::new(0).expect("context for epoch 0"))
}

fn context_epoch1() -> &'static EpochContext {
    static CONTEXT: OnceLock<EpochContext> = OnceLock::new();
    CONTEXT.get_or_init(|| EpochContext::new(1).expect("context for epoch 1"))
}

fn test_header() -> H256 {
    let header = keccak_256(b"meowpow test vector");
    assert_eq!(
        header.as_bytes(),
        hex!("f26babb9de373655c7eed8eb18578d6dfeaef48aee414b929e82d5f3cbd14e68")
    );
    header
}

const TEST_NONCE: u64 = 0x0123456789abcdef;

#[test]
fn light_cache_golden_items() {
    let cache = cache_epoch0();
    assert_eq!(cache.len(), 262139);
    assert_eq!(
        cache[0].as_bytes(),
        hex!("5e493e76a1318e50815c6ce77950425532964ebbb8dcf94718991fa9a82eaf37658de68ca6fe078884e803da3a26a4aa56420a6867ebcd9ab0f29b08d1c48fed")
    );
    assert_eq!(
        cache[1].as_bytes(),
        hex!("47bcbf5825d4ba95ed8d9074291fa2242cd6aabab201fd923565086c6d19b93c6936bba8def3c8e40f891288f9926eb87318c30b22611653439801d2a596a78c")
    );
    assert_eq!(
        cache[42].as_bytes(),
        hex!("0456beabdfa2df615e3270e101f457d3daf4eb11bd7f4ca440abf99076e7c92a64877c6bce7750e3338e9a8201a68469788367d38bde65c33d2ed55bc1a5b954")
    );
    assert_eq!(
        cache[cache.len() - 1].as_bytes(),
        hex!("724f2f86c24c487809dc3897acbbd32d5d791e4536aa1520e65e93891a40dde5887899ffc556cbd174f426e32ae2ab711be859601c024d1514b29a27370b662e")
    );
}

#[test]
fn dataset_item_golden() {
    let cache = cache_epoch0();
    let expected_0 = hex!("3496f71d25f04f3feeee158b7628638bf3787f9a96ac24a7f656773235eab307cea27e4eaa834515bdde3952556d4ee8c5ed46eedd31eb7de9ee328b562b9a1aec140ae1adfe401c80ff58cf35f5e3812768a1888dd88ac61c40c4b8f05a8bba8e784933b55cce1e86091cd77a07cef990279824b16178713350123036117d9a");
    assert_eq!(calc_dataset_item_1024(cache, 0).0, expected_0);

    let expected_42 = hex!("c6cd015d243f85fd921b9e432595247138deb93f0f4f17e4d8bd94b5f8a19d523f7e6d4503ca173b0934e1f63df06eccd57ff42f991158a8675e0900a8a01913b25b7a3ae954fbd8c60ca9a5c03cccfd30de97e4eb1d16fcbc76d2d66a1a05112ace4c4e1b74f087ea9cdb8cd7d15488dda5475346442ff1e20a048a87f83891");
    assert_eq!(calc_dataset_item_1024(cache, 42).0, expected_42);

    let expected_12345 = hex!("d8afff03c88e9db421bfb43405da5e2a099f52cd487b5f1aefc1429dd8ad0cbc7ff77046a98355b46b051585a7757d5be31196a487522efc03090aa11138d7ef5291fb0d40cc48c49e237e5bf456b37d7ba2650174ff187f74e9c0b0708a7619f26753be5929ec426f59a875dc79ba6741a2b3af2c0ffe051c39182ee3620517");
    assert_eq!(calc_dataset_item_1024(cache, 12345).0, expected_12345);
}

#[test]
fn hash_one_golden_epoch0() {
    let context = context_epoch0();

    let (mix, final_hash) = context.hash_one(0, H256::zero(), 0).unwrap();
    assert_eq!(
        mix.as_bytes(),
        hex!("2ae46266ca4a2f5d126649049bcec7da561cfa33df66721c3b49ca3a49927cb4")
    );
    assert_eq!(
        final_hash.as_bytes(),
        hex!("84f9879171393ba9ebdcb4d08270186711a0c62bf205da3ad81ccb13c335f499")
    );

    let (mix, final_hash) = context.hash_one(0, test_header(), TEST_NONCE).unwrap();
    assert_eq!(
        mix.as_bytes(),
        hex!("f3cbcb6b24cc318d827e63bed8651cba8ee5c0922b2fc445fd38861298590aa9")
    );
    assert_eq!(
        final_hash.as_bytes(),
        hex!("e568f8ff4bb7c90eeea40e066133d988e790d11a42b702b4c41661699ddb62e1")
    );
}

#[test]
fn hash_one_golden_next_period() {
    // Height 7 is in the second instruction period of epoch 0.
    let (mix, final_hash) = context_epoch0().hash_one(7, test_header(), TEST_NONCE).unwrap();
    assert_eq!(
        mix.as_bytes(),
        hex!("2747ddccea75214868e2fe8d973bb0dd146ccd2be7d5e8cb4f50177909cc6de8")
    );
    assert_eq!(
        final_hash.as_bytes(),
        hex!("6f5601b3382d1aa5e22d427cf0598cad6caf965d0abe47b78bfe3287ed079476")
    );
}

#[test]
fn hash_one_golden_epoch_boundary() {
    // Height 15000 is the first block of epoch 1.
    let context = context_epoch1();
    assert_eq!(context.epoch_number(), 1);
    assert_eq!(context.light_cache_num_items(), 264179);
    assert_eq!(context.full_dataset_num_items(), 8454143);

    let (mix, final_hash) = context.hash_one(15000, test_header(), TEST_NONCE).unwrap();
    assert_eq!(
        mix.as_bytes(),
        hex!("4481b2beb3a2f42f95e754215cdc3d33d36ea8c3529f4ac241cd25df0f72cf06")
    );
    assert_eq!(
        final_hash.as_bytes(),
        hex!("ef3c4193d2a2a8fb964634c56ddf412cf20b35c7c7e6f760109b7d24c0dd3f99")
    );
}

#[test]
fn epoch1_light_cache_differs() {
    let mut cache = vec![H512::zero(); light_cache_num_items(1)];
    build_light_cache(&mut cache, calculate_epoch_seed(1));
    assert_eq!(
        cache[0].as_bytes(),
        hex!("9e41457d823ff2c9d8b8d64349b7a7544ef5f5a3d1dd0bf7afcce9131aee12abae176e596ef77cbf92c4a44c7b06065d742caf68cc461f8f8045ae10e0838491")
    );
    assert_ne!(cache[0], cache_epoch0()[0]);
}

#[test]
fn hashing_is_deterministic() {
    let context = context_epoch0();
    let a = context.hash_one(100, test_header(), 42).unwrap();
    let b = context.hash_one(100, test_header(), 42).unwrap();
    assert_eq!(a, b);
}

#[test]
fn height_only_matters_per_period() {
    // Heights 0..=5 share one instruction period, so the hash is identical;
    // height 6 starts the next period.
    let context = context_epoch0();
    let base = context.hash_one(0, test_header(), TEST_NONCE).unwrap();
    assert_eq!(context.hash_one(5, test_header(), TEST_NONCE).unwrap(), base);
    assert_ne!(context.hash_one(6, test_header(), TEST_NONCE).unwrap(), base);
}

#[test]
fn context_cache_reuses_within_epoch() {
    let cache = ContextCache::new();
    let a = cache.get_for_height(0).unwrap();
    let b = cache.get_for_height(14999).unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(a.epoch_number(), 0);
    assert_eq!(a.light_cache_num_items(), 262139);
    assert_eq!(a.full_dataset_num_items(), 8388593);
}

#[test]
fn light_and_full_agree() {
    let full = FullEpochContext::new(0).expect("full context for epoch 0");
    assert_eq!(full.generated_num_items(), 0);

    let light = context_epoch0()
        .hash_one(0, test_header(), TEST_NONCE)
        .unwrap();
    let lazy = full.hash_one(0, test_header(), TEST_NONCE).unwrap();
    assert_eq!(light, lazy);
    assert!(full.generated_num_items() > 0);

    // Memoized items are joined, not recomputed differently.
    let touched = full.generated_num_items();
    let again = full.hash_one(0, test_header(), TEST_NONCE).unwrap();
    assert_eq!(again, lazy);
    assert_eq!(full.generated_num_items(), touched);

    let item = full.dataset_item(12345);
    assert_eq!(item.0, calc_dataset_item_1024(cache_epoch0(), 12345).0);
}

#[test]
fn verify_round_trip() {
    let context = context_epoch0();
    let header = test_header();
    let (mix, final_hash) = context.hash_one(0, header, TEST_NONCE).unwrap();

    // Any boundary at or above the final hash accepts.
    assert_eq!(
        verify(context, 0, header, mix, TEST_NONCE, H256::repeat_byte(0xff)),
        Ok(true)
    );
    assert_eq!(verify(context, 0, header, mix, TEST_NONCE, final_hash), Ok(true));

    // A boundary below rejects without erroring.
    assert_eq!(
        verify(context, 0, header, mix, TEST_NONCE, H256::zero()),
        Ok(false)
    );

    // A single flipped bit in the mix digest rejects.
    let mut corrupted = mix;
    corrupted.as_bytes_mut()[17] ^= 0x04;
    assert_eq!(
        verify(context, 0, header, corrupted, TEST_NONCE, H256::repeat_byte(0xff)),
        Ok(false)
    );

    // A wrong nonce rejects.
    assert_eq!(
        verify(context, 0, header, mix, TEST_NONCE + 1, H256::repeat_byte(0xff)),
        Ok(false)
    );

    // The cheap final-hash check agrees.
    assert!(verify_final_hash(header, mix, TEST_NONCE, final_hash));
    assert!(!verify_final_hash(header, corrupted, TEST_NONCE, final_hash));
}

#[test]
fn invalid_inputs_are_errors() {
    let context = context_epoch0();
    assert_eq!(
        context.hash_one(-1, H256::zero(), 0),
        Err(Error::NegativeHeight(-1))
    );
    assert_eq!(
        context.hash_one(15000, H256::zero(), 0),
        Err(Error::EpochMismatch {
            context_epoch: 0,
            height: 15000,
            height_epoch: 1,
        })
    );
    assert_eq!(
        verify(context, -3, H256::zero(), H256::zero(), 0, H256::zero()),
        Err(Error::NegativeHeight(-3))
    );
}
