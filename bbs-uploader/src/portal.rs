//! WebDriver-backed [`ListingPortal`]: drives Chrome through chromedriver against the
//! BizBuySell broker pages.
//!
//! Every wait goes through [`wait_and_retry`] around [`wait_until`], so a slow page gets
//! `MAX_TRIES` full timeouts before the session fails.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bbs_uploader_core::config::Settings;
use bbs_uploader_core::contract::{ListingPortal, PortalLauncher};
use bbs_uploader_core::error::{AutomationError, AutomationResult};
use bbs_uploader_core::wait::{prepare_and_wait, wait_and_retry, wait_until, POLL_INTERVAL};
use serde_json::json;
use tempfile::TempDir;
use thirtyfour::error::WebDriverResult;
use thirtyfour::prelude::*;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const LOGIN_URL: &str = "https://www.bizbuysell.com/users/login.aspx";
pub const BATCH_UPLOAD_URL: &str = "https://www.bizbuysell.com/brokers/batch/batchupload.aspx";
const BATCH_IMPORT_PAGE: &str = "batchimport.aspx";

const DASHBOARD_ID: &str = "brokerHdrDashboard";
const FILE_INPUT_ID: &str = "ctl00_ContentPlaceHolder1_AsyncFileUploadBulkCSV_ctl02";
const UPLOAD_BUTTON_ID: &str = "ctl00_ContentPlaceHolder1_btnUploadDocument";
const UPDATE_ALL_ID: &str = "updateAll";
const IMPORT_ALL_ID: &str = "importAll";
const ACCOUNT_MENU_ID: &str = "dropMyBBS";
const SIGN_OUT_LINK: &str = "li#topNav_MyBBS ul.dropdown-menu li:last-child a";
const SIGN_IN_ID: &str = "hlSignIn";

const UPDATE_STATUS_CELLS: &str = "#batchListingUpdates div.updateRow div.row.updateItem div.col-sm-3";
const IMPORT_STATUS_CELLS: &str = "#batchListingImports div.batchRow div.row.importItem div.col-sm-3";
const IMPORT_ROWS: &str = "#batchListingImports .batchRow";
const ROW_DROPDOWNS: &str = ".row .listingActions.menus.actions .dropdown.lActions";
const DROPDOWN_TOGGLE: &str = "a.current.btn.btn-secondary.dropdown-toggle";
const DROPDOWN_MENU: &str = "ul.dropdown-menu";
const DEFAULT_BUSINESS_TYPE: &str = "Miscellaneous Restaurant and Bar";

/// The page renders placeholder inputs; the real fields only pick up values after an
/// `input` event fires on them.
const LOGIN_SCRIPT: &str = r#"
const inputEvent = new Event("input");
const user = document.getElementById("txtUserNamePlaceHolder");
user.value = arguments[0];
user.dispatchEvent(inputEvent);
const pass = document.getElementById("txtPasswordPlaceHolder");
pass.value = arguments[1];
pass.dispatchEvent(inputEvent);
document.getElementById("ctl00_ctl00_Content_ContentPlaceHolder1_LoginControl_BtnLogin").click();
"#;

const UPLOAD_COMPLETE_SCRIPT: &str = "AsyncFileUpload_ClientUploadComplete();";

/// Pause around the async file upload callback; the page offers nothing to wait on.
const UPLOAD_SETTLE: Duration = Duration::from_secs(6);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

fn browser(err: WebDriverError) -> AutomationError {
    AutomationError::Browser(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ready {
    Present,
    Clickable,
}

/// Scratch directories Chrome writes its profile and caches into.
pub struct ProfileDirs {
    pub user_data: TempDir,
    pub data_path: TempDir,
    pub disk_cache: TempDir,
}

impl ProfileDirs {
    pub fn create() -> AutomationResult<Self> {
        Ok(Self {
            user_data: tempfile::tempdir()?,
            data_path: tempfile::tempdir()?,
            disk_cache: tempfile::tempdir()?,
        })
    }
}

/// Command-line switches for Chrome. Production runs headless in a single process.
pub fn chrome_args(production: bool, dirs: &ProfileDirs) -> Vec<String> {
    let mut args: Vec<String> = [
        "--no-sandbox",
        "--disable-gpu",
        "--incognito",
        "--window-size=1280x1696",
        "--enable-javascript",
        "--disable-dev-shm-usage",
        "--disable-dev-tools",
        "--no-zygote",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push(format!("--user-data-dir={}", dirs.user_data.path().display()));
    args.push(format!("--data-path={}", dirs.data_path.path().display()));
    args.push(format!("--disk-cache-dir={}", dirs.disk_cache.path().display()));
    args.push("--remote-debugging-port=9222".to_string());
    args.push(format!("--user-agent={USER_AGENT}"));
    args.push("--lang=en-US,en;q=0.9".to_string());

    if production {
        args.push("--headless".to_string());
        args.push("--single-process".to_string());
    }
    args
}

/// Starts chromedriver and a Chrome session for each launch.
pub struct ChromeLauncher {
    settings: Settings,
}

impl ChromeLauncher {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    async fn spawn_chromedriver(&self) -> AutomationResult<Child> {
        let path = &self.settings.chrome_driver_path;
        let port = self.settings.webdriver_port;
        info!(chrome_driver_path = %path.display(), port, "Starting chromedriver");

        let child = Command::new(path)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AutomationError::Browser(format!(
                    "failed to start chromedriver at {}: {e}",
                    path.display()
                ))
            })?;

        wait_until(
            "chromedriver port",
            self.settings.webdriver_timeout,
            POLL_INTERVAL,
            move || async move {
                Ok(tokio::net::TcpStream::connect(("127.0.0.1", port))
                    .await
                    .ok()
                    .map(|_| ()))
            },
        )
        .await?;
        Ok(child)
    }
}

#[async_trait]
impl PortalLauncher for ChromeLauncher {
    async fn launch(&self) -> AutomationResult<Box<dyn ListingPortal>> {
        let chromedriver = self.spawn_chromedriver().await?;
        let dirs = ProfileDirs::create()?;

        let mut caps = DesiredCapabilities::chrome();
        caps.set_binary(&self.settings.chrome_path.to_string_lossy())
            .map_err(browser)?;
        for arg in chrome_args(self.settings.production, &dirs) {
            debug!(arg = %arg, "Adding chrome arg");
            caps.add_arg(&arg).map_err(browser)?;
        }

        let driver = WebDriver::new(self.settings.webdriver_url(), caps)
            .await
            .map_err(browser)?;
        info!(
            chrome_path = %self.settings.chrome_path.display(),
            production = self.settings.production,
            "Browser session started"
        );

        Ok(Box::new(BrowserPortal {
            driver: Mutex::new(Some(driver)),
            chromedriver: Mutex::new(Some(chromedriver)),
            _dirs: dirs,
            timeout: self.settings.webdriver_timeout,
            upload_timeout: self.settings.webdriver_upload_timeout,
            max_tries: self.settings.max_tries,
        }))
    }
}

pub struct BrowserPortal {
    driver: Mutex<Option<WebDriver>>,
    chromedriver: Mutex<Option<Child>>,
    _dirs: ProfileDirs,
    timeout: Duration,
    upload_timeout: Duration,
    max_tries: usize,
}

impl BrowserPortal {
    async fn session(&self) -> AutomationResult<WebDriver> {
        self.driver
            .lock()
            .await
            .clone()
            .ok_or_else(|| AutomationError::Browser("browser session already closed".into()))
    }

    /// Wait for the first element returned by `find` that is in the `ready` state.
    async fn wait_for<F, Fut>(
        &self,
        what: &str,
        timeout: Duration,
        ready: Ready,
        find: F,
    ) -> AutomationResult<WebElement>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WebDriverResult<Vec<WebElement>>>,
    {
        debug!(what, timeout_secs = timeout.as_secs(), "wait_and_retry for element");
        let find = &find;
        wait_and_retry(what, self.max_tries, move || async move {
            wait_until(what, timeout, POLL_INTERVAL, move || async move {
                let found = find().await.map_err(browser)?;
                first_ready(found, ready).await
            })
            .await
        })
        .await
    }

    /// Load `url`, then wait for an element as [`Self::wait_for`] does. A retry loads the
    /// page again; polls within one attempt only look.
    async fn open_and_wait_for<F, Fut>(
        &self,
        url: &str,
        what: &str,
        ready: Ready,
        find: F,
    ) -> AutomationResult<WebElement>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WebDriverResult<Vec<WebElement>>>,
    {
        let driver = self.session().await?;
        let page = &driver;
        let find = &find;
        prepare_and_wait(
            what,
            self.max_tries,
            self.timeout,
            POLL_INTERVAL,
            move || async move {
                debug!(url, "Loading page");
                page.goto(url).await.map_err(browser)
            },
            move || async move {
                let found = find().await.map_err(browser)?;
                first_ready(found, ready).await
            },
        )
        .await
    }

    /// Wait until every element `find` returns has text containing `complete`.
    async fn wait_for_completion<F, Fut>(&self, what: &str, find: F) -> AutomationResult<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WebDriverResult<Vec<WebElement>>>,
    {
        let find = &find;
        let timeout = self.upload_timeout;
        wait_and_retry(what, self.max_tries, move || async move {
            wait_until(what, timeout, POLL_INTERVAL, move || async move {
                let cells = find().await.map_err(browser)?;
                for cell in cells {
                    match cell.text().await {
                        Ok(text) if text.contains("complete") => {}
                        Ok(_) => return Ok(None),
                        Err(e) => {
                            debug!(error = %e, "Status cell not readable yet");
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(()))
            })
            .await
        })
        .await
    }

    async fn click(&self, element: &WebElement, what: &str) -> AutomationResult<()> {
        info!(what, "Clicking");
        element.click().await.map_err(browser)
    }

    async fn prepare_new_imports(&self, driver: &WebDriver) -> AutomationResult<()> {
        info!("Preparing all new imports with default business type");
        let rows = driver
            .find_all(By::Css(IMPORT_ROWS))
            .await
            .map_err(browser)?;

        for (index, row) in rows.iter().enumerate() {
            let dropdowns = row
                .find_all(By::Css(ROW_DROPDOWNS))
                .await
                .map_err(browser)?;
            // First dropdown defaults to "Established business"; the second is business type.
            let Some(business_type) = dropdowns.get(1) else {
                debug!(row = index + 1, dropdowns = dropdowns.len(), "No business type dropdown");
                continue;
            };

            let toggle = self
                .wait_for("business type dropdown toggle", self.timeout, Ready::Clickable, move || {
                    business_type.find_all(By::Css(DROPDOWN_TOGGLE))
                })
                .await?;
            self.click(&toggle, "business type dropdown toggle").await?;

            let menu = business_type
                .find(By::Css(DROPDOWN_MENU))
                .await
                .map_err(browser)?;
            let option_xpath = format!("li/a[contains(text(), \"{DEFAULT_BUSINESS_TYPE}\")]");
            let menu = &menu;
            let option_xpath = option_xpath.as_str();
            let option = self
                .wait_for(DEFAULT_BUSINESS_TYPE, self.timeout, Ready::Clickable, move || {
                    menu.find_all(By::XPath(option_xpath))
                })
                .await?;
            self.click(&option, DEFAULT_BUSINESS_TYPE).await?;
        }

        info!(rows = rows.len(), "All imports are prepared with default business type");
        Ok(())
    }
}

async fn first_ready(found: Vec<WebElement>, ready: Ready) -> AutomationResult<Option<WebElement>> {
    for element in found {
        match ready {
            Ready::Present => return Ok(Some(element)),
            Ready::Clickable => match element.is_clickable().await {
                Ok(true) => return Ok(Some(element)),
                Ok(false) => {}
                Err(e) => debug!(error = %e, "Element went stale while waiting"),
            },
        }
    }
    Ok(None)
}

#[async_trait]
impl ListingPortal for BrowserPortal {
    async fn login(&self, username: &str, password: &str) -> AutomationResult<()> {
        info!(username, "Logging in");
        let driver = self.session().await?;
        let page = &driver;

        self.open_and_wait_for(LOGIN_URL, "login page inputs", Ready::Present, move || {
            page.find_all(By::Tag("input"))
        })
        .await?;

        page.execute(LOGIN_SCRIPT, vec![json!(username), json!(password)])
            .await
            .map_err(browser)?;

        debug!("Waiting for login completion (for dashboard to display)");
        self.wait_for("dashboard", self.timeout, Ready::Present, move || {
            page.find_all(By::Id(DASHBOARD_ID))
        })
        .await?;

        info!(username, "Login complete");
        Ok(())
    }

    async fn upload(&self, csv_path: &Path) -> AutomationResult<()> {
        info!(csv_file_path = %csv_path.display(), "Beginning automated upload");
        let driver = self.session().await?;
        let page = &driver;

        info!(url = BATCH_UPLOAD_URL, "Getting batch upload page");
        page.goto(BATCH_UPLOAD_URL).await.map_err(browser)?;

        let file_input = self
            .wait_for("file input field", self.timeout, Ready::Present, move || {
                page.find_all(By::Id(FILE_INPUT_ID))
            })
            .await?;
        info!(csv_file_path = %csv_path.display(), "Sending CSV file path into input field");
        file_input
            .send_keys(csv_path.display().to_string())
            .await
            .map_err(browser)?;

        tokio::time::sleep(UPLOAD_SETTLE).await;
        info!("Executing AsyncFileUpload_ClientUploadComplete() JS");
        page.execute(UPLOAD_COMPLETE_SCRIPT, Vec::new())
            .await
            .map_err(browser)?;
        tokio::time::sleep(UPLOAD_SETTLE).await;

        let upload_button = self
            .wait_for("upload button", self.timeout, Ready::Clickable, move || {
                page.find_all(By::Id(UPLOAD_BUTTON_ID))
            })
            .await?;
        self.click(&upload_button, "upload button").await?;

        let upload_timeout = self.upload_timeout;
        wait_and_retry("batchimport.aspx page", self.max_tries, move || async move {
            wait_until("batchimport.aspx page", upload_timeout, POLL_INTERVAL, move || async move {
                let url = page.current_url().await.map_err(browser)?;
                Ok(url.as_str().contains(BATCH_IMPORT_PAGE).then_some(()))
            })
            .await
        })
        .await?;

        let update_all = self
            .wait_for("updateAll button", self.upload_timeout, Ready::Clickable, move || {
                page.find_all(By::Id(UPDATE_ALL_ID))
            })
            .await?;
        self.click(&update_all, "updateAll button").await?;

        info!("Waiting for completion of Update Listings operation");
        self.wait_for_completion("all updates to complete", move || {
            page.find_all(By::Css(UPDATE_STATUS_CELLS))
        })
        .await?;
        info!("Update Listings operation complete");

        let import_all = page
            .find_all(By::Id(IMPORT_ALL_ID))
            .await
            .map_err(browser)?;
        if let Some(import_all) = import_all.first() {
            self.prepare_new_imports(page).await?;
            self.click(import_all, "Import All button").await?;

            info!("Waiting for completion of Import Listings operation");
            self.wait_for_completion("all imports to complete", move || {
                page.find_all(By::Css(IMPORT_STATUS_CELLS))
            })
            .await?;
            info!("Import Listings operation complete");
        } else {
            debug!("No new listings to import");
        }

        info!(csv_file_path = %csv_path.display(), "Upload complete");
        Ok(())
    }

    async fn logout(&self) -> AutomationResult<()> {
        info!("Logging out");
        let driver = self.session().await?;
        let page = &driver;

        let menu = self
            .wait_for("account menu button", self.timeout, Ready::Clickable, move || {
                page.find_all(By::Id(ACCOUNT_MENU_ID))
            })
            .await?;
        self.click(&menu, "account menu button").await?;

        let sign_out = self
            .wait_for("sign out link", self.timeout, Ready::Clickable, move || {
                page.find_all(By::Css(SIGN_OUT_LINK))
            })
            .await?;
        self.click(&sign_out, "sign out link").await?;

        self.wait_for("sign in link", self.timeout, Ready::Clickable, move || {
            page.find_all(By::Id(SIGN_IN_ID))
        })
        .await?;

        info!("Logout complete");
        Ok(())
    }

    async fn quit(&self) -> AutomationResult<()> {
        info!("Shutting down the browser session");
        let driver = self.driver.lock().await.take();
        let closed = match driver {
            Some(driver) => driver.quit().await.map_err(browser),
            None => Ok(()),
        };

        if let Some(mut child) = self.chromedriver.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to stop chromedriver");
            }
        }
        closed
    }
}
