mod evidence_pool_tests;
mod tools;
mod tx_pool_tests;
