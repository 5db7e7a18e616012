use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // customer_id
    pub exp: i64,
    pub iat: i64,
    pub token_type: String, // "access"
}

impl Claims {
    pub fn customer_id(&self) -> AppResult<i64> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
    }
}

/// 店面登录签发的客户令牌，这里只做校验；签发方法供测试和内部工具使用
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expires_in: i64,
}

impl JwtService {
    pub fn new(secret: &str, access_expires_in: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expires_in: access_expires_in,
        }
    }

    pub fn generate_access_token(&self, customer_id: i64) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.access_token_expires_in);

        let claims = Claims {
            sub: customer_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            token_type: "access".to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(AppError::JwtError)
    }

    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(AppError::JwtError)
    }

    pub fn verify_access_token(&self, token: &str) -> AppResult<Claims> {
        let claims = self.verify_token(token)?;

        if claims.token_type != "access" {
            return Err(AppError::AuthError("Invalid access token type".to_string()));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_roundtrip() {
        let jwt = JwtService::new("secret", 3600);
        let token = jwt.generate_access_token(42).unwrap();
        let claims = jwt.verify_access_token(&token).unwrap();
        assert_eq!(claims.customer_id().unwrap(), 42);
    }

    #[test]
    fn test_rejects_other_secret_and_type() {
        let jwt = JwtService::new("secret", 3600);
        let token = JwtService::new("other", 3600).generate_access_token(1).unwrap();
        assert!(jwt.verify_access_token(&token).is_err());

        let claims = Claims {
            sub: "1".into(),
            exp: Utc::now().timestamp() + 60,
            iat: Utc::now().timestamp(),
            token_type: "refresh".into(),
        };
        let refresh = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(matches!(
            jwt.verify_access_token(&refresh),
            Err(AppError::AuthError(_))
        ));
    }
}
