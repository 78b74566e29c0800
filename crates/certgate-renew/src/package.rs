//! Certificate packaging with validated chain ordering
//!
//! The authority-delivered chain order is not trusted: the trust path is
//! rebuilt from the leaf by issuer signature verification, so a chain
//! delivered reversed (or shuffled) still produces a correct package. The
//! result is a PKCS#12 archive protected by the caller-supplied secret, the
//! form the gateway imports.

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use thiserror::Error;
use tracing::debug;

use crate::acme::IssuedOrder;

/// Errors while assembling the certificate package
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("Private key could not be parsed: {0}")]
    KeyParse(String),

    #[error("Certificate material could not be parsed: {0}")]
    CertificateParse(String),

    #[error("No certificate in the chain matches the private key")]
    LeafNotFound,

    #[error("No valid trust path could be built: {0}")]
    BrokenChain(String),

    #[error("Package export failed: {0}")]
    Export(String),
}

/// Importable certificate package: leaf, key and ordered chain sealed as
/// PKCS#12 under the run's package secret.
#[derive(Debug)]
pub struct CertificatePackage {
    /// DER-encoded PKCS#12 archive
    pub der: Vec<u8>,
    /// Leaf expiry, for the run report
    pub not_after: String,
    /// Total certificates in the validated path (leaf included)
    pub chain_length: usize,
}

/// Build the package from an issued order.
pub fn package(
    issued: &IssuedOrder,
    friendly_name: &str,
    secret: &str,
) -> Result<CertificatePackage, PackagingError> {
    let key = PKey::private_key_from_pem(issued.key_pem.as_bytes())
        .map_err(|e| PackagingError::KeyParse(e.to_string()))?;
    let certs = X509::stack_from_pem(issued.chain_pem.as_bytes())
        .map_err(|e| PackagingError::CertificateParse(e.to_string()))?;
    if certs.is_empty() {
        return Err(PackagingError::CertificateParse(
            "chain contained no certificates".to_string(),
        ));
    }

    let (leaf, rest) = split_leaf(certs, &key)?;
    let ordered = order_chain(&leaf, rest)?;
    debug!(
        chain_length = ordered.len() + 1,
        "trust path validated, exporting package"
    );

    let mut ca_stack = Stack::new().map_err(|e| PackagingError::Export(e.to_string()))?;
    for cert in &ordered {
        ca_stack
            .push(cert.clone())
            .map_err(|e| PackagingError::Export(e.to_string()))?;
    }

    let mut builder = Pkcs12::builder();
    builder.name(friendly_name);
    builder.pkey(&key);
    builder.cert(&leaf);
    builder.ca(ca_stack);
    let pkcs12 = builder
        .build2(secret)
        .map_err(|e| PackagingError::Export(e.to_string()))?;
    let der = pkcs12
        .to_der()
        .map_err(|e| PackagingError::Export(e.to_string()))?;

    Ok(CertificatePackage {
        der,
        not_after: leaf.not_after().to_string(),
        chain_length: ordered.len() + 1,
    })
}

/// Find the certificate whose public key matches the private key; everything
/// else is chain material.
fn split_leaf(
    certs: Vec<X509>,
    key: &PKey<Private>,
) -> Result<(X509, Vec<X509>), PackagingError> {
    let mut leaf = None;
    let mut rest = Vec::with_capacity(certs.len());
    for cert in certs {
        let matches = cert
            .public_key()
            .map(|pk| pk.public_eq(key))
            .unwrap_or(false);
        if matches && leaf.is_none() {
            leaf = Some(cert);
        } else {
            rest.push(cert);
        }
    }
    leaf.map(|l| (l, rest)).ok_or(PackagingError::LeafNotFound)
}

/// Walk issuer links from the leaf, verifying each hop's signature, until
/// the pool is consumed. Returns the chain leaf-side first, root last.
fn order_chain(leaf: &X509, mut pool: Vec<X509>) -> Result<Vec<X509>, PackagingError> {
    let mut ordered = Vec::with_capacity(pool.len());
    let mut current = leaf.clone();
    while !pool.is_empty() {
        let issuer_pos = pool.iter().position(|candidate| {
            candidate
                .public_key()
                .map(|pk| current.verify(&pk).unwrap_or(false))
                .unwrap_or(false)
        });
        let Some(pos) = issuer_pos else {
            return Err(PackagingError::BrokenChain(format!(
                "no issuer found in remaining chain material ({} certificate(s) unplaced)",
                pool.len()
            )));
        };
        let next = pool.remove(pos);
        current = next.clone();
        ordered.push(next);
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeArtifact;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::x509::extension::BasicConstraints;
    use openssl::x509::{X509Builder, X509NameBuilder, X509NameRef};

    fn make_key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
    }

    fn make_cert(
        cn: &str,
        issuer: Option<(&X509NameRef, &PKey<Private>)>,
        key: &PKey<Private>,
        is_ca: bool,
    ) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", cn).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = {
            let mut bn = BigNum::new().unwrap();
            bn.rand(96, MsbOption::MAYBE_ZERO, false).unwrap();
            bn.to_asn1_integer().unwrap()
        };
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_pubkey(key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(90).unwrap())
            .unwrap();
        if is_ca {
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
        }
        match issuer {
            Some((issuer_name, issuer_key)) => {
                builder.set_issuer_name(issuer_name).unwrap();
                builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
            }
            None => {
                builder.set_issuer_name(&name).unwrap();
                builder.sign(key, MessageDigest::sha256()).unwrap();
            }
        }
        builder.build()
    }

    struct TestChain {
        key_pem: String,
        leaf: X509,
        intermediate: X509,
        root: X509,
    }

    fn test_chain() -> TestChain {
        let root_key = make_key();
        let root = make_cert("Test Root CA", None, &root_key, true);

        let intermediate_key = make_key();
        let intermediate = make_cert(
            "Test Intermediate CA",
            Some((root.subject_name(), &root_key)),
            &intermediate_key,
            true,
        );

        let leaf_key = make_key();
        let leaf = make_cert(
            "leaf.example.org",
            Some((intermediate.subject_name(), &intermediate_key)),
            &leaf_key,
            false,
        );

        TestChain {
            key_pem: String::from_utf8(leaf_key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
            leaf,
            intermediate,
            root,
        }
    }

    fn pem_of(certs: &[&X509]) -> String {
        certs
            .iter()
            .map(|c| String::from_utf8(c.to_pem().unwrap()).unwrap())
            .collect()
    }

    fn issued(chain_pem: String, key_pem: String) -> IssuedOrder {
        IssuedOrder {
            chain_pem,
            key_pem,
            challenge: ChallengeArtifact {
                token: "tok".to_string(),
                content: "tok.thumb".to_string(),
            },
        }
    }

    #[test]
    fn test_order_chain_fixes_reversed_input() {
        let chain = test_chain();
        let ordered = order_chain(
            &chain.leaf,
            vec![chain.root.clone(), chain.intermediate.clone()],
        )
        .unwrap();

        assert_eq!(ordered.len(), 2);
        assert_eq!(
            ordered[0].to_der().unwrap(),
            chain.intermediate.to_der().unwrap()
        );
        assert_eq!(ordered[1].to_der().unwrap(), chain.root.to_der().unwrap());
    }

    #[test]
    fn test_order_chain_rejects_unrelated_certificate() {
        let chain = test_chain();
        let stray_key = make_key();
        let stray = make_cert("Stray CA", None, &stray_key, true);

        let err = order_chain(&chain.leaf, vec![chain.intermediate.clone(), stray]).unwrap_err();
        assert!(matches!(err, PackagingError::BrokenChain(_)));
    }

    #[test]
    fn test_package_round_trip_with_reversed_chain() {
        let chain = test_chain();
        // Authority delivers root first, leaf last
        let chain_pem = pem_of(&[&chain.root, &chain.intermediate, &chain.leaf]);
        let result = package(
            &issued(chain_pem, chain.key_pem.clone()),
            "leaf.example.org",
            "s3cret",
        )
        .unwrap();

        assert_eq!(result.chain_length, 3);

        let parsed = Pkcs12::from_der(&result.der)
            .unwrap()
            .parse2("s3cret")
            .unwrap();
        let reloaded_leaf = parsed.cert.expect("leaf in package");
        assert_eq!(
            reloaded_leaf.to_der().unwrap(),
            chain.leaf.to_der().unwrap()
        );

        // The reloaded leaf must verify against the intermediate's key
        let intermediate_key = chain.intermediate.public_key().unwrap();
        assert!(reloaded_leaf.verify(&intermediate_key).unwrap());

        let ca = parsed.ca.expect("chain in package");
        assert_eq!(ca.len(), 2);
        let ca_ders: Vec<Vec<u8>> = ca.iter().map(|c| c.to_der().unwrap()).collect();
        assert!(ca_ders.contains(&chain.intermediate.to_der().unwrap()));
        assert!(ca_ders.contains(&chain.root.to_der().unwrap()));
    }

    #[test]
    fn test_package_rejects_wrong_key() {
        let chain = test_chain();
        let other_key = make_key();
        let chain_pem = pem_of(&[&chain.leaf, &chain.intermediate, &chain.root]);
        let key_pem = String::from_utf8(other_key.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let err = package(&issued(chain_pem, key_pem), "leaf", "s3cret").unwrap_err();
        assert!(matches!(err, PackagingError::LeafNotFound));
    }

    #[test]
    fn test_package_rejects_garbage_material() {
        let err = package(
            &issued("not a pem".to_string(), "not a key".to_string()),
            "leaf",
            "s3cret",
        )
        .unwrap_err();
        assert!(matches!(err, PackagingError::KeyParse(_)));
    }
}
