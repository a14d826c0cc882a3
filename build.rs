fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &[
                "proto/peg/v1/peg.proto",
                "proto/cosmos/auth/v1beta1/auth.proto",
                "proto/cosmos/auth/v1beta1/query.proto",
                "proto/cosmos/base/v1beta1/coin.proto",
                "proto/cosmos/base/abci/v1beta1/abci.proto",
                "proto/cosmos/crypto/secp256k1/keys.proto",
                "proto/cosmos/tx/signing/v1beta1/signing.proto",
                "proto/cosmos/tx/v1beta1/tx.proto",
                "proto/cosmos/tx/v1beta1/service.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
