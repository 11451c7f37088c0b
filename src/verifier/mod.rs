//! 符号断言校验边界
//!
//! Verifier 是外部协作者：完整的符号引擎在进程外。内置实现只做可确定的
//! 判断（数值相等、字面量归一后相等），无法判定的断言一律记为失败条目，
//! 逐条吸收异常，绝不让单条断言的错误中断整体校验。

use crate::governance::round6;
use crate::schemas::{ClaimCheck, SolverClaim, VerifierResult};

/// 断言校验协作者
pub trait ClaimVerifier: Send + Sync {
    /// 汇总校验 Solver 给出的符号断言；实现不得 panic，逐条失败即可
    fn verify(&self, claims: &[SolverClaim]) -> VerifierResult;
}

/// 内置保守校验器：只认数值与归一字面量相等
#[derive(Debug, Default)]
pub struct BasicClaimVerifier;

impl BasicClaimVerifier {
    fn check_claim(claim: &SolverClaim) -> ClaimCheck {
        let ctype = claim.claim_type.trim().to_lowercase();
        let (ok, canonical) = match ctype.as_str() {
            "equality" => Self::check_equality(claim),
            // 微积分类断言需要外部符号引擎，这里保守记失败
            other => (false, format!("unsupported_claim_type:{other}")),
        };
        ClaimCheck {
            claim_type: ctype,
            ok,
            canonical,
        }
    }

    fn check_equality(claim: &SolverClaim) -> (bool, String) {
        let (Some(lhs), Some(rhs)) = (claim.lhs.as_deref(), claim.rhs.as_deref()) else {
            return (false, "missing_lhs_or_rhs".to_string());
        };
        let canonical = format!("Eq({lhs}, {rhs})");
        if let (Ok(a), Ok(b)) = (lhs.trim().parse::<f64>(), rhs.trim().parse::<f64>()) {
            return ((a - b).abs() <= 1e-9, canonical);
        }
        let normalize = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        (normalize(lhs) == normalize(rhs), canonical)
    }
}

impl ClaimVerifier for BasicClaimVerifier {
    fn verify(&self, claims: &[SolverClaim]) -> VerifierResult {
        let mut details = Vec::with_capacity(claims.len());
        let mut passed = 0u32;
        let mut failed = 0u32;
        for claim in claims {
            let check = Self::check_claim(claim);
            if check.ok {
                passed += 1;
            } else {
                failed += 1;
            }
            details.push(check);
        }
        let checked = passed + failed;
        let disagreement = if checked > 0 {
            f64::from(failed) / f64::from(checked)
        } else {
            0.0
        };
        let status = if checked == 0 {
            "no_claims"
        } else if disagreement >= 0.5 {
            "disagreement"
        } else {
            "ok"
        };
        VerifierResult {
            status: status.to_string(),
            checked_claims: checked,
            passed_claims: passed,
            failed_claims: failed,
            disagreement_rate: round6(disagreement),
            details,
        }
    }
}
