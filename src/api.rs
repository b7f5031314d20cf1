// src/api.rs
use crate::auth::{self, Passwords, Sessions, SESSION_COOKIE};
use crate::db;
use crate::error::{handle_rejection, Apology, Error, Unauthenticated};
use crate::models::{
    HistoryView, LoginForm, PasswordForm, PortfolioView, Position, Quote, QuoteForm,
    RegisterForm, TradeForm, Usd, User,
};
use crate::pages;
use crate::quote::QuoteProvider;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const FORM_LIMIT: u64 = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub quotes: Arc<dyn QuoteProvider>,
    pub sessions: Arc<Sessions>,
    pub passwords: Arc<Passwords>,
    pub starting_cash: Usd,
}

/// The full service: routes, apology handling, no-cache headers, access log.
pub fn app(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(state)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache_headers()))
        .with(warp::log("stock_trader::api"))
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(state.clone()))
        .and_then(index_handler);

    let buy_form = warp::path!("buy")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and_then(buy_form_handler);

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(form::<TradeForm>())
        .and_then(buy_handler);

    let sell_form = warp::path!("sell")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and_then(sell_form_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(form::<TradeForm>())
        .and_then(sell_handler);

    let quote_form = warp::path!("quote")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and_then(quote_form_handler);

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(form::<QuoteForm>())
        .and_then(quote_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and_then(history_handler);

    let login_form = warp::path!("login")
        .and(warp::get())
        .and_then(login_form_handler);

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<LoginForm>())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::get())
        .and_then(logout_handler);

    let register_form = warp::path!("register")
        .and(warp::get())
        .and_then(register_form_handler);

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form::<RegisterForm>())
        .and_then(register_handler);

    let password_form = warp::path!("password")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and_then(password_form_handler);

    let password = warp::path!("password")
        .and(warp::post())
        .and(with_user(state))
        .and(form::<PasswordForm>())
        .and_then(password_handler);

    index
        .or(buy_form)
        .or(buy)
        .or(sell_form)
        .or(sell)
        .or(quote_form)
        .or(quote)
        .or(history)
        .or(login_form)
        .or(login)
        .or(logout)
        .or(register_form)
        .or(register)
        .or(password_form)
        .or(password)
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the session cookie to a stored user, or rejects with
/// `Unauthenticated`.
fn with_user(
    state: AppState,
) -> impl Filter<Extract = (AppState, User), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
        .and(with_state(state))
        .and_then(authenticate)
        .untuple_one()
}

async fn authenticate(
    token: Option<String>,
    state: AppState,
) -> Result<(AppState, User), Rejection> {
    let session = token
        .as_deref()
        .and_then(|token| state.sessions.verify(token))
        .ok_or_else(|| warp::reject::custom(Unauthenticated))?;

    match db::find_user(&state.pool, session.user_id).await {
        Ok(Some(user)) if user.session_version == session.version => Ok((state, user)),
        Ok(_) => Err(warp::reject::custom(Unauthenticated)),
        Err(e) => Err(Apology::from(e).into()),
    }
}

fn form<T: DeserializeOwned + Send + 'static>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

fn redirect(to: &'static str) -> Response {
    warp::redirect::see_other(Uri::from_static(to)).into_response()
}

fn with_cookie(reply: impl Reply, cookie: String) -> Response {
    warp::reply::with_header(reply, header::SET_COOKIE, cookie).into_response()
}

/// A submitted field, unless missing or blank.
fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// A submitted secret, unless missing or empty. Whitespace counts.
fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_shares(raw: Option<&str>) -> Result<i64, Apology> {
    let raw = raw.ok_or_else(|| Apology::forbidden("must provide number of shares"))?;
    match raw.trim().parse::<i64>() {
        Ok(shares) if shares > 0 => Ok(shares),
        _ => Err(Apology::new(
            StatusCode::BAD_REQUEST,
            "shares must be a positive integer",
        )),
    }
}

async fn hash_password(passwords: Arc<Passwords>, password: String) -> Result<String, Apology> {
    tokio::task::spawn_blocking(move || passwords.hash(&password))
        .await
        .map_err(|e| {
            error!("Password hashing task failed: {}", e);
            Apology::internal()
        })?
        .map_err(Apology::from)
}

async fn verify_password(
    passwords: Arc<Passwords>,
    password: String,
    hash: Option<String>,
) -> bool {
    tokio::task::spawn_blocking(move || passwords.check(&password, hash.as_deref()))
        .await
        .unwrap_or_else(|e| {
            error!("Password verification task failed: {}", e);
            false
        })
}

async fn index_handler(state: AppState, user: User) -> Result<Response, Rejection> {
    let holdings = db::holdings(&state.pool, user.id)
        .await
        .map_err(Apology::from)?;

    let mut total = user.cash;
    let mut positions = Vec::with_capacity(holdings.len());
    for holding in holdings {
        let quote = state.quotes.lookup(&holding.symbol).await.ok_or_else(|| {
            Apology::new(
                StatusCode::BAD_GATEWAY,
                format!("unable to quote {}", holding.symbol),
            )
        })?;
        let value = quote
            .price
            .times(holding.shares)
            .ok_or_else(|| Apology::from(Error::Overflow))?;
        total = total
            .checked_add(value)
            .ok_or_else(|| Apology::from(Error::Overflow))?;
        positions.push(Position {
            symbol: holding.symbol,
            name: quote.name,
            shares: holding.shares,
            price: quote.price,
            total: value,
        });
    }

    let view = PortfolioView {
        holdings: positions,
        cash: user.cash,
        total,
    };
    Ok(warp::reply::json(&view).into_response())
}

async fn buy_form_handler(_state: AppState, _user: User) -> Result<Response, Rejection> {
    Ok(warp::reply::html(pages::buy()).into_response())
}

async fn buy_handler(state: AppState, user: User, form: TradeForm) -> Result<Response, Rejection> {
    let quote = match filled(&form.symbol) {
        Some(symbol) => state.quotes.lookup(symbol).await,
        None => None,
    }
    .ok_or_else(|| Apology::forbidden("must provide valid stock symbol"))?;

    let shares = parse_shares(filled(&form.shares))?;

    db::buy(&state.pool, user.id, &quote, shares)
        .await
        .map_err(Apology::from)?;

    Ok(redirect("/"))
}

async fn sell_form_handler(state: AppState, user: User) -> Result<Response, Rejection> {
    let holdings = db::holdings(&state.pool, user.id)
        .await
        .map_err(Apology::from)?;
    let page = pages::sell(holdings.iter().map(|h| h.symbol.as_str()));
    Ok(warp::reply::html(page).into_response())
}

async fn sell_handler(state: AppState, user: User, form: TradeForm) -> Result<Response, Rejection> {
    let not_owned = || Apology::forbidden("must provide valid stock symbol");

    let symbol = filled(&form.symbol)
        .map(|s| s.trim().to_uppercase())
        .ok_or_else(not_owned)?;
    let holding = db::holding(&state.pool, user.id, &symbol)
        .await
        .map_err(Apology::from)?
        .ok_or_else(not_owned)?;

    let shares = parse_shares(filled(&form.shares))?;
    if shares > holding.shares {
        return Err(Apology::from(Error::InsufficientShares).into());
    }

    let quote = state.quotes.lookup(&symbol).await.ok_or_else(not_owned)?;
    // Trade against the stored symbol even if the provider spells it differently.
    let quote = Quote { symbol, ..quote };

    db::sell(&state.pool, user.id, &quote, shares)
        .await
        .map_err(Apology::from)?;

    Ok(redirect("/"))
}

async fn quote_form_handler(_state: AppState, _user: User) -> Result<Response, Rejection> {
    Ok(warp::reply::html(pages::quote()).into_response())
}

async fn quote_handler(state: AppState, _user: User, form: QuoteForm) -> Result<Response, Rejection> {
    let quote = match filled(&form.symbol) {
        Some(symbol) => state.quotes.lookup(symbol).await,
        None => None,
    }
    .ok_or_else(|| Apology::forbidden("invalid stock symbol"))?;

    Ok(warp::reply::json(&quote).into_response())
}

async fn history_handler(state: AppState, user: User) -> Result<Response, Rejection> {
    let transactions = db::history(&state.pool, user.id)
        .await
        .map_err(Apology::from)?;
    Ok(warp::reply::json(&HistoryView { transactions }).into_response())
}

async fn login_form_handler() -> Result<Response, Rejection> {
    Ok(with_cookie(
        warp::reply::html(pages::login()),
        auth::clear_cookie(),
    ))
}

async fn login_handler(state: AppState, form: LoginForm) -> Result<Response, Rejection> {
    Ok(match login(&state, form).await {
        Ok(response) => response,
        Err(apology) => with_cookie(apology, auth::clear_cookie()),
    })
}

async fn login(state: &AppState, form: LoginForm) -> Result<Response, Apology> {
    let username = filled(&form.username)
        .map(str::trim)
        .ok_or_else(|| Apology::forbidden("must provide username"))?;
    let password = given(&form.password).ok_or_else(|| Apology::forbidden("must provide password"))?;

    let user = db::find_user_by_name(&state.pool, username).await?;
    let verified = verify_password(
        state.passwords.clone(),
        password.to_string(),
        user.as_ref().map(|user| user.hash.clone()),
    )
    .await;

    let user = match user {
        Some(user) if verified => user,
        _ => {
            warn!("Failed login attempt for {:?}", username);
            return Err(Apology::forbidden("invalid username and/or password"));
        }
    };

    let token = state.sessions.create_token(user.id, user.session_version)?;
    info!("User {} ({}) logged in", user.id, user.username);
    Ok(with_cookie(redirect("/"), auth::session_cookie(&token)))
}

async fn logout_handler() -> Result<Response, Rejection> {
    Ok(with_cookie(redirect("/"), auth::clear_cookie()))
}

async fn register_form_handler() -> Result<Response, Rejection> {
    Ok(with_cookie(
        warp::reply::html(pages::register()),
        auth::clear_cookie(),
    ))
}

async fn register_handler(state: AppState, form: RegisterForm) -> Result<Response, Rejection> {
    Ok(match register(&state, form).await {
        Ok(response) => response,
        Err(apology) => with_cookie(apology, auth::clear_cookie()),
    })
}

async fn register(state: &AppState, form: RegisterForm) -> Result<Response, Apology> {
    let username = filled(&form.username)
        .map(str::trim)
        .ok_or_else(|| Apology::forbidden("must provide username"))?;
    let password = given(&form.password).ok_or_else(|| Apology::forbidden("must provide password"))?;
    if form.confirmation.as_deref() != Some(password) {
        return Err(Apology::forbidden("passwords do not match"));
    }

    let hash = hash_password(state.passwords.clone(), password.to_string()).await?;
    let id = db::create_user(&state.pool, username, &hash, state.starting_cash).await?;

    info!("Registered user {} ({})", id, username);
    Ok(with_cookie(redirect("/"), auth::clear_cookie()))
}

async fn password_form_handler(_state: AppState, _user: User) -> Result<Response, Rejection> {
    Ok(warp::reply::html(pages::password()).into_response())
}

async fn password_handler(
    state: AppState,
    user: User,
    form: PasswordForm,
) -> Result<Response, Rejection> {
    let (old, new, confirm) = match (
        given(&form.oldpass),
        given(&form.newpass),
        given(&form.confirm),
    ) {
        (Some(old), Some(new), Some(confirm)) => (old, new, confirm),
        _ => return Err(Apology::forbidden("missing old or new password").into()),
    };

    if !verify_password(state.passwords.clone(), old.to_string(), Some(user.hash.clone())).await {
        return Err(Apology::forbidden("old password incorrect").into());
    }
    if new != confirm {
        return Err(Apology::forbidden("new passwords do not match").into());
    }

    let hash = hash_password(state.passwords.clone(), new.to_string()).await?;
    db::update_hash(&state.pool, user.id, &hash)
        .await
        .map_err(Apology::from)?;

    info!("User {} changed their password", user.id);
    Ok(with_cookie(redirect("/logout"), auth::clear_cookie()))
}
