//! End-to-end ledger behavior: scripts, blocks, mining and chain selection

use scriptchain::block::{genesis_block, new_block, Blockchain};
use scriptchain::mining::{mine_block, spawn_miner, MiningResult};
use scriptchain::pow::leading_zero_digits;
use scriptchain::reorganization::reorganize_chain;
use scriptchain::script::op_hash;
use scriptchain::transaction::new_transaction;
use scriptchain::*;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Wallet {
    key: RsaPrivateKey,
    pubkey: String,
}

impl Wallet {
    fn new(private_pem: &str, public_pem: &str) -> Self {
        let key = RsaPrivateKey::from_pkcs8_pem(private_pem).unwrap();
        Self { key, pubkey: STANDARD.encode(public_pem) }
    }

    fn alice() -> Self {
        Self::new(include_str!("keys/alice.pem"), include_str!("keys/alice.pub"))
    }

    fn bob() -> Self {
        Self::new(include_str!("keys/bob.pem"), include_str!("keys/bob.pub"))
    }

    /// Pay-to-public-key-hash in the ledger's script language
    fn lock(&self) -> String {
        format!(
            "sign pubKey --- pubKey OPDup OPHash {} OPEqualVerify sign OPDup pubKey OPDup OPHash pubKey OPDup OPCheckSig",
            op_hash(&self.pubkey)
        )
    }

    fn pay(&self, value: Value) -> TransactionOutput {
        TransactionOutput { value, script: self.lock() }
    }

    fn unlock(&self, txid: Hash, index: u64) -> TransactionInput {
        let digest = hex::decode(op_hash(&self.pubkey)).unwrap();
        let signature = self.key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();

        let mut script_args = ScriptArgs::new();
        script_args.insert("sign".to_string(), STANDARD.encode(signature));
        script_args.insert("pubKey".to_string(), self.pubkey.clone());
        TransactionInput { prev_tx_id: txid, output_index: index, script_args }
    }
}

fn mined(parent: &Block, txs: Vec<Transaction>) -> Block {
    let cancel = AtomicBool::new(false);
    let (block, result) = mine_block(new_block(parent, txs), 1, &cancel, 1_000_000);
    assert_eq!(result, MiningResult::Success);
    block
}

fn wait_for_height(ledger: &Ledger, height: Height) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while ledger.height() < height {
        assert!(Instant::now() < deadline, "timed out waiting for height {}", height);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_signed_spend_mined_through_ledger() {
    let alice = Wallet::alice();
    let bob = Wallet::bob();
    let issuance = new_transaction(vec![], vec![alice.pay(100)]);
    let config = LedgerConfig { difficulty: 1, ..LedgerConfig::default() };
    let ledger = Arc::new(Ledger::new(genesis_block(vec![issuance.clone()]), config).unwrap());

    // bob cannot spend alice's output
    let stolen = ledger.submit_transaction(vec![bob.unlock(issuance.id, 0)], vec![bob.pay(100)]);
    assert!(matches!(stolen, Err(ConsensusError::TransactionValidation(_))));

    let payment = ledger
        .submit_transaction(vec![alice.unlock(issuance.id, 0)], vec![bob.pay(70), alice.pay(30)])
        .unwrap();
    assert!(ledger.mine_candidate());
    wait_for_height(&ledger, 1);

    let tip = ledger.tip();
    assert!(leading_zero_digits(&tip.hash()) >= 1);
    assert_eq!(tip.transactions, vec![payment.clone()]);

    let utxo_set = ledger.utxo_set();
    assert!(!utxo_set.contains(&issuance.id, 0));
    assert_eq!(utxo_set.get(&payment.id, 0).map(|o| o.value), Some(70));
    assert_eq!(utxo_set.get(&payment.id, 1).map(|o| o.value), Some(30));

    // bob can now move his output
    let onward = new_transaction(vec![bob.unlock(payment.id, 0)], vec![alice.pay(70)]);
    assert!(ledger.is_valid_transaction(&onward));
}

#[test]
fn test_accepted_block_swaps_exactly_its_outputs() {
    let alice = Wallet::alice();
    let issuance = new_transaction(vec![], vec![alice.pay(50), alice.pay(25)]);
    let mut chain = Blockchain::new(genesis_block(vec![issuance.clone()]), 1).unwrap();

    let tx = new_transaction(vec![alice.unlock(issuance.id, 1)], vec![alice.pay(10), alice.pay(15)]);
    let block = mined(chain.tip(), vec![tx.clone()]);
    let difficulty = block.header.difficulty;
    assert!(chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());

    let hex = chain.tip().hash().to_hex();
    assert!(hex.chars().take_while(|c| *c == '0').count() >= difficulty);

    let utxo_set = chain.utxo_set();
    assert!(!utxo_set.contains(&issuance.id, 1));
    assert!(utxo_set.contains(&issuance.id, 0));
    assert_eq!(utxo_set.outputs_of(&tx.id).len(), 2);
    assert_eq!(utxo_set.len(), 3);
}

#[test]
fn test_add_block_all_or_nothing() {
    let alice = Wallet::alice();
    let bob = Wallet::bob();
    let issuance = new_transaction(vec![], vec![alice.pay(40), alice.pay(40)]);
    let mut chain = Blockchain::new(genesis_block(vec![issuance.clone()]), 1).unwrap();

    let good = new_transaction(vec![alice.unlock(issuance.id, 0)], vec![bob.pay(40)]);
    let forged = new_transaction(vec![bob.unlock(issuance.id, 1)], vec![bob.pay(40)]);
    let block = mined(chain.tip(), vec![good, forged]);
    let before = chain.utxo_set().clone();

    let result = chain.add_block(block, &ScriptContext::default()).unwrap();
    assert!(matches!(result, ValidationResult::Invalid(reason) if reason.contains("index 1")));
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.utxo_set(), &before);
}

#[test]
fn test_chain_selector_prefers_longer_valid_chain() {
    let genesis = genesis_block(vec![]);
    let mut three = vec![genesis.clone()];
    for _ in 0..2 {
        let next = mined(three.last().unwrap(), vec![]);
        three.push(next);
    }

    // a 3-block alternative replaces a 1-block local chain
    let short = Ledger::new(genesis.clone(), LedgerConfig { difficulty: 1, ..LedgerConfig::default() }).unwrap();
    assert!(short.sync_chain(three.clone()).unwrap());
    assert_eq!(short.chain().blocks(), &three[..]);

    // a 1-block alternative never replaces a 3-block local chain
    assert!(!short.sync_chain(vec![genesis.clone()]).unwrap());
    assert_eq!(short.chain().len(), 3);

    let local = Blockchain::new(genesis, 1).unwrap();
    let result = reorganize_chain(&three, &local, &ScriptContext::default()).unwrap();
    assert_eq!(result.chain.len(), 3);
    assert!(reorganize_chain(&three[..1], &result.chain, &ScriptContext::default()).is_err());
}

#[test]
fn test_cancelled_miner_never_calls_back() {
    let genesis = genesis_block(vec![]);
    let (sender, receiver) = std::sync::mpsc::channel::<Block>();
    let handle = spawn_miner(new_block(&genesis, vec![]), MAX_DIFFICULTY, move |block| {
        let _ = sender.send(block);
    });

    thread::sleep(Duration::from_millis(20));
    handle.cancel();
    assert_eq!(handle.join(), MiningResult::Cancelled);
    assert!(receiver.try_recv().is_err());
}

#[cfg(feature = "third-party-http")]
mod third_party {
    use super::*;
    use scriptchain::oracle::check_third_party;
    use scriptchain::script::verify_script;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve `body` as JSON on a loopback port, answering each request after `delay`
    fn serve_json(body: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request);
                thread::sleep(delay);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        url
    }

    fn third_party_context() -> ScriptContext {
        ScriptContext { flags: SCRIPT_ENABLE_THIRD_PARTY, third_party_timeout_secs: 5 }
    }

    #[test]
    fn test_third_party_lookup_compares_served_field() {
        let url = serve_json(r#"{"data":{"price":"42","tags":["a","b"],"n":7}}"#, Duration::ZERO);
        let ctx = third_party_context();

        assert!(check_third_party(&ctx, &url, "data.price", "42"));
        assert!(!check_third_party(&ctx, &url, "data.price", "43"));
        assert!(check_third_party(&ctx, &url, "data.tags.1", "b"));
        assert!(check_third_party(&ctx, &url, "data.n", "7"));

        let args = ScriptArgs::new();
        assert!(verify_script(&format!("--- 42 data.price {} OPCheckThirdParty", url), &args, &ctx));
        assert!(!verify_script(&format!("--- 41 data.price {} OPCheckThirdParty", url), &args, &ctx));
    }

    #[test]
    fn test_chain_replay_does_not_block_readers() {
        let url = serve_json(r#"{"a":{"b":"ok"}}"#, Duration::from_millis(1500));
        let lock = format!("--- ok a.b {} OPCheckThirdParty", url);
        let issuance = new_transaction(vec![], vec![TransactionOutput { value: 5, script: lock }]);
        let genesis = genesis_block(vec![issuance.clone()]);
        let spend = new_transaction(
            vec![TransactionInput { prev_tx_id: issuance.id, output_index: 0, script_args: ScriptArgs::new() }],
            vec![],
        );
        let alternative = vec![genesis.clone(), mined(&genesis, vec![spend.clone()])];

        let config = LedgerConfig {
            difficulty: 1,
            allow_third_party_scripts: true,
            ..LedgerConfig::default()
        };
        let ledger = Arc::new(Ledger::new(genesis, config).unwrap());
        let syncing = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || ledger.sync_chain(alternative))
        };

        // the replay is now waiting on the lookup
        thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        assert_eq!(ledger.height(), 0);
        assert!(ledger.utxo_set().contains(&issuance.id, 0));
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(syncing.join().unwrap().unwrap());
        assert_eq!(ledger.height(), 1);
        assert!(!ledger.utxo_set().contains(&issuance.id, 0));
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn outputs() -> impl Strategy<Value = Vec<TransactionOutput>> {
        prop::collection::vec(
            (any::<u64>(), "[a-z]{0,8} --- [a-zA-Z0-9 ]{0,16}")
                .prop_map(|(value, script)| TransactionOutput { value, script }),
            0..4,
        )
    }

    fn inputs() -> impl Strategy<Value = Vec<TransactionInput>> {
        prop::collection::vec(
            (any::<[u8; 32]>(), any::<u64>(), prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,8}", 0..3))
                .prop_map(|(txid, output_index, script_args)| TransactionInput {
                    prev_tx_id: Hash(txid),
                    output_index,
                    script_args,
                }),
            0..4,
        )
    }

    proptest! {
        #[test]
        fn tx_id_depends_only_on_content(inputs in inputs(), outputs in outputs(), lock_time in any::<u64>()) {
            let a = new_transaction(inputs.clone(), outputs.clone());
            let mut b = new_transaction(inputs, outputs);
            b.lock_time = lock_time;
            prop_assert_eq!(a.id, b.id);
            prop_assert_eq!(scriptchain::transaction::calculate_tx_id(&b.inputs, &b.outputs), b.id);
        }
    }
}
