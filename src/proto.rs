//! Protobuf types generated by `tonic-build` from the definitions under
//! `proto/`. The peg module schemas are the authoritative wire format for
//! valsets, batches, confirmations and batch fees; the cosmos packages are
//! the minimal subset needed to sign and broadcast transactions.

/// Peg module types.
pub mod peg {
    /// Version 1 of the peg module wire format.
    pub mod v1 {
        tonic::include_proto!("peg.v1");
    }
}

/// Cosmos-sdk standard types.
#[allow(missing_docs)]
pub mod cosmos {
    pub mod auth {
        pub mod v1beta1 {
            tonic::include_proto!("cosmos.auth.v1beta1");
        }
    }
    pub mod base {
        pub mod v1beta1 {
            tonic::include_proto!("cosmos.base.v1beta1");
        }
        pub mod abci {
            pub mod v1beta1 {
                tonic::include_proto!("cosmos.base.abci.v1beta1");
            }
        }
    }
    pub mod crypto {
        pub mod secp256k1 {
            tonic::include_proto!("cosmos.crypto.secp256k1");
        }
    }
    pub mod tx {
        pub mod signing {
            pub mod v1beta1 {
                tonic::include_proto!("cosmos.tx.signing.v1beta1");
            }
        }
        pub mod v1beta1 {
            tonic::include_proto!("cosmos.tx.v1beta1");
        }
    }
}
